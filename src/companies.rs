//! Company catalog
//!
//! Static list of listed companies keyed by their DART corporation code.

use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Company {
    pub name: &'static str,
    pub name_ko: &'static str,
    pub code: &'static str,
    pub sector: &'static str,
    /// Statement tables have been loaded for this company.
    pub has_data: bool,
}

pub const COMPANIES: &[Company] = &[
    Company {
        name: "Samsung Electronics",
        name_ko: "삼성전자",
        code: "00126380",
        sector: "Technology",
        has_data: true,
    },
    Company {
        name: "SK Hynix",
        name_ko: "SK하이닉스",
        code: "00164779",
        sector: "Technology",
        has_data: false,
    },
    Company {
        name: "LG Electronics",
        name_ko: "LG전자",
        code: "00401731",
        sector: "Technology",
        has_data: false,
    },
    Company {
        name: "Hyundai Motor",
        name_ko: "현대자동차",
        code: "00164742",
        sector: "Automotive",
        has_data: false,
    },
    Company {
        name: "POSCO Holdings",
        name_ko: "포스코홀딩스",
        code: "00266961",
        sector: "Materials",
        has_data: false,
    },
    Company {
        name: "KB Financial Group",
        name_ko: "KB금융지주",
        code: "00258801",
        sector: "Finance",
        has_data: false,
    },
    Company {
        name: "Shinhan Financial Group",
        name_ko: "신한지주",
        code: "00264273",
        sector: "Finance",
        has_data: false,
    },
    Company {
        name: "NAVER",
        name_ko: "네이버",
        code: "00885164",
        sector: "Technology",
        has_data: false,
    },
    Company {
        name: "Kakao",
        name_ko: "카카오",
        code: "00918295",
        sector: "Technology",
        has_data: false,
    },
    Company {
        name: "Celltrion",
        name_ko: "셀트리온",
        code: "00421045",
        sector: "Healthcare",
        has_data: false,
    },
];

pub fn all() -> &'static [Company] {
    COMPANIES
}

pub fn by_code(code: &str) -> Option<&'static Company> {
    COMPANIES.iter().find(|c| c.code == code.trim())
}

/// Partial, case-insensitive match on the English name or a partial match on
/// the Korean name.
pub fn by_name(name: &str) -> Option<&'static Company> {
    let needle = name.trim();
    if needle.is_empty() {
        return None;
    }
    let lowered = needle.to_lowercase();

    COMPANIES
        .iter()
        .find(|c| c.name.to_lowercase().contains(&lowered) || c.name_ko.contains(needle))
}

/// First catalog company mentioned anywhere in free text, by name or code.
pub fn mentioned_in(text: &str) -> Option<&'static Company> {
    let lowered = text.to_lowercase();

    COMPANIES.iter().find(|c| {
        let first_word = c.name.split_whitespace().next().unwrap_or(c.name).to_lowercase();
        lowered.contains(&c.name.to_lowercase())
            || (first_word.len() > 3 && lowered.contains(&first_word))
            || text.contains(c.name_ko)
            || text.contains(c.code)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_code_and_name() {
        assert_eq!(by_code("00126380").map(|c| c.name), Some("Samsung Electronics"));
        assert!(by_code("99999999").is_none());

        assert_eq!(by_name("hynix").map(|c| c.code), Some("00164779"));
        assert_eq!(by_name("카카오").map(|c| c.code), Some("00918295"));
        assert!(by_name("").is_none());
        assert!(by_name("Apple").is_none());
    }

    #[test]
    fn test_mentioned_in_free_text() {
        let found = mentioned_in("Analyze Samsung's earnings quality").unwrap();
        assert_eq!(found.code, "00126380");

        let found = mentioned_in("현대자동차 현금흐름 분석").unwrap();
        assert_eq!(found.name, "Hyundai Motor");

        assert!(mentioned_in("What is an accrual?").is_none());
    }
}
