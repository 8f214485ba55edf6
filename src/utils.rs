/// Module utilitaire pour les fonctions partagées
use chrono::{DateTime, NaiveDateTime, Utc};

/// Formate un timestamp en secondes en format lisible
///
/// EXEMPLE:
/// 1700000000 → "2023-11-14 22:13:20"
pub fn format_timestamp(timestamp_secs: i64) -> String {
    if let Some(datetime_utc) = DateTime::<Utc>::from_timestamp(timestamp_secs, 0) {
        datetime_utc.format("%Y-%m-%d %H:%M:%S").to_string()
    } else {
        "Invalid timestamp".to_string()
    }
}

/// Parse une date YYYY-MM-DD en horodatage UTC à minuit
pub fn parse_date(date_str: &str) -> anyhow::Result<DateTime<Utc>> {
    let naive_date = NaiveDateTime::parse_from_str(
        &(date_str.to_string() + " 00:00:00"),
        "%Y-%m-%d %H:%M:%S",
    )?;
    Ok(DateTime::<Utc>::from_naive_utc_and_offset(naive_date, Utc))
}
