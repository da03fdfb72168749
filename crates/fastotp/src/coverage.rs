//! Country coverage and per-OTP pricing.

use rust_decimal::Decimal;
use serde::Serialize;

/// A served market.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Country {
    pub name: &'static str,
    /// ISO 3166-1 alpha-2.
    pub code: &'static str,
    pub dial_prefix: &'static str,
    /// Per-OTP cost in ten-thousandths of a credit.
    cost_bp: i64,
    /// Delivery success rates in tenths of a percent.
    whatsapp_rate: u16,
    sms_rate: u16,
    pub currency_code: &'static str,
}

impl Country {
    /// Per-OTP cost in credits.
    pub fn cost(&self) -> Decimal {
        Decimal::new(self.cost_bp, 4)
    }

    pub fn whatsapp_rate(&self) -> Decimal {
        Decimal::new(self.whatsapp_rate.into(), 1)
    }

    pub fn sms_rate(&self) -> Decimal {
        Decimal::new(self.sms_rate.into(), 1)
    }
}

const fn country(
    name: &'static str,
    code: &'static str,
    dial_prefix: &'static str,
    whatsapp_rate: u16,
    sms_rate: u16,
    cost_bp: i64,
    currency_code: &'static str,
) -> Country {
    Country {
        name,
        code,
        dial_prefix,
        cost_bp,
        whatsapp_rate,
        sms_rate,
        currency_code,
    }
}

pub static COVERAGE: &[Country] = &[
    country("Nigeria", "NG", "+234", 992, 981, 45, "NGN"),
    country("Kenya", "KE", "+254", 987, 975, 40, "KES"),
    country("South Africa", "ZA", "+27", 995, 990, 50, "ZAR"),
    country("Ghana", "GH", "+233", 978, 964, 42, "GHS"),
    country("Egypt", "EG", "+20", 981, 972, 38, "EGP"),
    country("Ethiopia", "ET", "+251", 943, 931, 55, "ETB"),
    country("Tanzania", "TZ", "+255", 962, 948, 47, "TZS"),
    country("Uganda", "UG", "+256", 958, 942, 46, "UGX"),
    country("Senegal", "SN", "+221", 965, 951, 48, "XOF"),
    country("Côte d'Ivoire", "CI", "+225", 959, 947, 49, "XOF"),
    country("Cameroon", "CM", "+237", 947, 935, 52, "XAF"),
    country("Zambia", "ZM", "+260", 934, 920, 54, "ZMW"),
    country("Rwanda", "RW", "+250", 968, 956, 43, "RWF"),
    country("Morocco", "MA", "+212", 975, 963, 41, "MAD"),
    country("Tunisia", "TN", "+216", 971, 959, 42, "TND"),
    country("Zimbabwe", "ZW", "+263", 921, 908, 58, "USD"),
    country("Mozambique", "MZ", "+258", 915, 902, 60, "MZN"),
    country("Angola", "AO", "+244", 932, 919, 55, "AOA"),
    country("Botswana", "BW", "+267", 953, 941, 48, "BWP"),
    country("Namibia", "NA", "+264", 950, 938, 50, "NAD"),
    country("Malawi", "MW", "+265", 908, 895, 62, "MWK"),
    country("Mali", "ML", "+223", 893, 881, 65, "XOF"),
    country("Burkina Faso", "BF", "+226", 887, 874, 68, "XOF"),
    country("Sierra Leone", "SL", "+232", 872, 860, 70, "SLE"),
];

/// Find the country for an E.164 number by longest dial prefix.
pub fn lookup(identifier: &str) -> Option<&'static Country> {
    COVERAGE
        .iter()
        .filter(|c| identifier.starts_with(c.dial_prefix))
        .max_by_key(|c| c.dial_prefix.len())
}

/// Public view of a coverage row.
#[derive(Debug, Clone, Serialize)]
pub struct CoverageEntry {
    pub country: &'static str,
    pub code: &'static str,
    pub dial: &'static str,
    pub cost: Decimal,
    pub whatsapp: Decimal,
    pub sms: Decimal,
    pub currency_code: &'static str,
}

impl From<&Country> for CoverageEntry {
    fn from(c: &Country) -> Self {
        Self {
            country: c.name,
            code: c.code,
            dial: c.dial_prefix,
            cost: c.cost(),
            whatsapp: c.whatsapp_rate(),
            sms: c.sms_rate(),
            currency_code: c.currency_code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_lookup_nigeria() {
        let c = lookup("+2348031234567").unwrap();
        assert_eq!(c.code, "NG");
        assert_eq!(c.cost(), dec!(0.0045));
    }

    #[test]
    fn test_lookup_prefers_longest_prefix() {
        // +27 (South Africa) must not shadow +2xx markets
        assert_eq!(lookup("+254712345678").unwrap().code, "KE");
        assert_eq!(lookup("+27821234567").unwrap().code, "ZA");
        assert_eq!(lookup("+201001234567").unwrap().code, "EG");
    }

    #[test]
    fn test_lookup_unknown() {
        assert!(lookup("+14155551234").is_none());
        assert!(lookup("ada@example.com").is_none());
    }

    #[test]
    fn test_table_is_unique() {
        let mut prefixes: Vec<_> = COVERAGE.iter().map(|c| c.dial_prefix).collect();
        prefixes.sort_unstable();
        prefixes.dedup();
        assert_eq!(prefixes.len(), COVERAGE.len());
    }
}
