// ============================================================================
// REJEU D'UNE BASE DE BOUGIES DANS LE MOTEUR
// ============================================================================
//
// Ce binaire rejoue l'historique d'une base SQLite de bougies dans une
// source du moteur, puis branche dessus un digest, une source miroir
// liée et quelques indicateurs. Les trous de l'historique sont comblés
// par l'interpolation de la source au fil du rejeu.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::Parser;
use rusqlite::{Connection, params};
use serde::Serialize;

use rust_candles_engine::digest::Digest;
use rust_candles_engine::indicator::Indicator;
use rust_candles_engine::intervals::Interval;
use rust_candles_engine::pricing::{Candle, CandleComponent, SampleKind};
use rust_candles_engine::source::Source;
use rust_candles_engine::timelapse::Timelapse;
use rust_candles_engine::utils::{format_timestamp, parse_date};

/// Facteur de standardisation des prix: 4 décimales conservées
const PRICE_SCALE: f64 = 10_000.0;

/// Arguments CLI du rejeu
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Chemin de la base SQLite (table candlesticks)
    #[arg(long, default_value = "candlesticks.db")]
    db: String,

    /// Fournisseur des données (colonne provider)
    #[arg(long, default_value = "binance")]
    provider: String,

    /// Le symbole/paire de trading à rejouer (ex: BTCUSDT)
    #[arg(short, long)]
    symbol: String,

    /// Timeframe de la source (doit figurer dans la table des sources)
    #[arg(short, long, default_value = "5m")]
    timeframe: String,

    /// Timeframe du digest (plus grand et divisible par la source)
    #[arg(short = 'g', long, default_value = "1h")]
    digest: String,

    /// Taille de fenêtre de la moyenne mobile
    #[arg(long, default_value_t = 20)]
    tail: usize,

    /// Optionnel: ne rejouer qu'à partir de cette date (YYYY-MM-DD)
    #[arg(short = 'd', long)]
    start_date: Option<String>,

    /// Exporter les N derniers points calculés en JSON sur stdout
    #[arg(long, default_value_t = 0)]
    json: usize,
}

/// Bougie brute telle que lue dans la base
struct StoredCandle {
    open_time_secs: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
}

/// Point exporté en JSON
#[derive(Serialize)]
struct ExportedPoint {
    index: usize,
    time: String,
    close: f64,
    mean: f64,
    stderr: f64,
    slope: f64,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let symbol = args.symbol.to_uppercase();

    let source_interval = Interval::from_timeframe(&args.timeframe)?;
    let digest_interval = Interval::from_timeframe(&args.digest)?;

    let start_stamp = match &args.start_date {
        Some(date_str) => Some(parse_date(date_str)?),
        None => None,
    };

    println!("Rejeu de {} {} depuis {}", symbol, args.timeframe, args.db);

    let conn = Connection::open(&args.db)
        .with_context(|| format!("impossible d'ouvrir la base {}", args.db))?;
    let stored = load_candles(&conn, &args.provider, &symbol, &args.timeframe, start_stamp)?;
    if stored.is_empty() {
        bail!(
            "aucune bougie pour {}/{}/{} dans {}",
            args.provider,
            symbol,
            args.timeframe,
            args.db
        );
    }
    println!("{} bougies chargées depuis la base.", stored.len());

    // L'origine de la source est la première bougie, alignée sur l'intervalle
    let first_stamp = DateTime::<Utc>::from_timestamp(stored[0].open_time_secs, 0)
        .context("horodatage invalide dans la base")?;
    let origin = source_interval.round(first_stamp);

    let source = Source::new(SampleKind::Candle, origin, source_interval, None)?;
    let digest = Digest::new(&source, digest_interval)?;
    let mirror = Source::new(SampleKind::Candle, origin, digest_interval, None)?;
    mirror.link(&digest)?;

    let closes = Indicator::plucking(&source, CandleComponent::End)?;
    let mean = Indicator::moving_mean(&closes, args.tail, None, true)?;
    let deviation = Indicator::moving_variance(&mean, false, true, true)?;
    let slope = Indicator::slope(&source, Some(CandleComponent::End))?;

    // Rejeu dans l'ordre chronologique; l'indice est recalculé depuis
    // l'horodatage, ce qui laisse la source interpoler les trous
    for candle in &stored {
        let stamp = DateTime::<Utc>::from_timestamp(candle.open_time_secs, 0)
            .context("horodatage invalide dans la base")?;
        let index = source.index_for(stamp)?;
        source.push(standardize(candle), Some(index))?;
    }

    let interpolated = source.len() as i64 - stored.len() as i64;
    println!("\n--- Statistiques ---");
    println!("Longueur de la source: {} ({} interpolées)", source.len(), interpolated.max(0));
    println!("Bins du digest {}: {}", args.digest, digest.len());
    println!("Longueur du miroir lié: {}", mirror.len());
    println!(
        "Fenêtre couverte: {} → {}",
        format_timestamp(source.timestamp().timestamp()),
        format_timestamp(source.stamp_for(source.len().saturating_sub(1)).timestamp())
    );

    println!("\n--- Derniers points (tail {}) ---", args.tail);
    let shown = source.len().min(5);
    for index in source.len() - shown..source.len() {
        println!(
            "  {} close={:.4} mean={:.4} stderr={:.4} slope={:.4}",
            format_timestamp(source.stamp_for(index).timestamp()),
            closes.value(index)? / PRICE_SCALE,
            mean.value(index)? / PRICE_SCALE,
            deviation.value(index)? / PRICE_SCALE,
            slope.value(index)? / PRICE_SCALE,
        );
    }

    if let Some(last_bin) = last_digest_bin(&digest) {
        println!(
            "Dernier bin du digest: start={:.4} end={:.4} min={:.4} max={:.4}",
            last_bin.start as f64 / PRICE_SCALE,
            last_bin.end as f64 / PRICE_SCALE,
            last_bin.min as f64 / PRICE_SCALE,
            last_bin.max as f64 / PRICE_SCALE,
        );
    }

    if args.json > 0 {
        let from = source.len().saturating_sub(args.json);
        let mut points = Vec::new();
        for index in from..source.len() {
            points.push(ExportedPoint {
                index,
                time: format_timestamp(source.stamp_for(index).timestamp()),
                close: closes.value(index)? / PRICE_SCALE,
                mean: mean.value(index)? / PRICE_SCALE,
                stderr: deviation.value(index)? / PRICE_SCALE,
                slope: slope.value(index)? / PRICE_SCALE,
            });
        }
        println!("{}", serde_json::to_string_pretty(&points)?);
    }

    println!("\n✅ Rejeu terminé pour {}/{}.", symbol, args.timeframe);
    Ok(())
}

/// Charge les bougies triées par date depuis la table candlesticks
fn load_candles(
    conn: &Connection,
    provider: &str,
    symbol: &str,
    timeframe: &str,
    start_stamp: Option<DateTime<Utc>>,
) -> Result<Vec<StoredCandle>> {
    let start_ms = start_stamp.map(|stamp| stamp.timestamp_millis()).unwrap_or(0);
    let mut stmt = conn.prepare(
        "SELECT open_time, open, high, low, close FROM candlesticks
         WHERE provider = ?1 AND symbol = ?2 AND timeframe = ?3 AND open_time >= ?4
         ORDER BY open_time ASC",
    )?;

    let candles = stmt
        .query_map(params![provider, symbol, timeframe, start_ms], |row| {
            Ok(StoredCandle {
                // open_time est stocké en millisecondes
                open_time_secs: row.get::<_, i64>(0)? / 1000,
                open: row.get(1)?,
                high: row.get(2)?,
                low: row.get(3)?,
                close: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(candles)
}

/// Convertit une bougie flottante de la base en bougie standardisée
fn standardize(candle: &StoredCandle) -> Candle {
    Candle::new(
        standardize_price(candle.open),
        standardize_price(candle.close),
        standardize_price(candle.low),
        standardize_price(candle.high),
    )
}

fn standardize_price(value: f64) -> u64 {
    (value * PRICE_SCALE).round().max(0.0) as u64
}

/// Le dernier bin alimenté du digest, s'il y en a un
fn last_digest_bin(digest: &Digest) -> Option<Candle> {
    if digest.len() == 0 {
        return None;
    }
    digest.get(digest.len() - 1)
}
