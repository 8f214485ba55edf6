// ============================================================================
// SIMULATION SYNTHÉTIQUE DU MOTEUR
// ============================================================================
//
// Ce binaire déroule un scénario complet sans aucune entrée externe:
// une marche de prix déterministe avec un trou, un digest en bougies
// plus grossières, une source miroir liée (délier puis relier), et une
// pile d'indicateurs dont la destruction se propage en cascade.

use anyhow::Result;
use clap::Parser;

use rust_candles_engine::digest::Digest;
use rust_candles_engine::indicator::Indicator;
use rust_candles_engine::intervals::Interval;
use rust_candles_engine::pricing::{Sample, SampleKind};
use rust_candles_engine::source::Source;
use rust_candles_engine::timelapse::Timelapse;
use rust_candles_engine::utils::{format_timestamp, parse_date};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Date d'origine de la simulation (YYYY-MM-DD)
    #[arg(short, long, default_value = "2024-01-01")]
    origin: String,

    /// Nombre d'échantillons simulés
    #[arg(short, long, default_value_t = 240)]
    count: usize,

    /// Taille de fenêtre de la moyenne mobile
    #[arg(long, default_value_t = 12)]
    tail: usize,
}

/// Marche de prix déterministe: une oscillation triangulaire autour de
/// 10000, sans aléa pour rendre chaque exécution reproductible
fn synthetic_price(index: usize) -> u64 {
    let phase = (index * 7) % 100;
    let wave = if phase < 50 { phase } else { 100 - phase };
    10_000 + 3 * wave as u64
}

fn main() -> Result<()> {
    let args = Args::parse();
    let origin = parse_date(&args.origin)?;

    println!("Simulation à partir du {}", format_timestamp(origin.timestamp()));

    let source = Source::new(
        SampleKind::Price,
        origin,
        Interval::MINUTE,
        Some(Sample::Price(synthetic_price(0))),
    )?;
    let digest = Digest::new(&source, Interval::MINUTES_15)?;
    let mirror = Source::new(SampleKind::Candle, origin, Interval::MINUTES_15, None)?;
    mirror.link(&digest)?;

    let mean = Indicator::moving_mean(&source, args.tail, None, true)?;
    let deviation = Indicator::moving_variance(&mean, true, true, true)?;
    let slope = Indicator::slope(&source, None)?;

    // Première moitié de la marche, un échantillon à la fois
    let half = args.count / 2;
    for index in 0..half {
        source.push(synthetic_price(index), None)?;
    }
    println!("Première moitié poussée: {} échantillons.", source.len());

    // Trou volontaire: on saute 10 emplacements, comblés par la source
    let resume_at = half + 10;
    source.push(synthetic_price(resume_at), Some(resume_at))?;
    println!(
        "Trou comblé: la source couvre {} emplacements après le saut.",
        source.len()
    );

    // Fin de la marche, par lots
    let rest: Vec<u64> = (resume_at + 1..args.count).map(synthetic_price).collect();
    if !rest.is_empty() {
        source.push(rest, None)?;
    }

    println!("\n--- État des séries ---");
    println!("Source {}: {} échantillons", source.interval(), source.len());
    println!("Digest {}: {} bins", digest.interval(), digest.len());
    println!("Miroir lié: {} échantillons", mirror.len());
    let last = source.len() - 1;
    println!(
        "Dernier point: {} prix={} moyenne={:.2} écart type={:.2} pente={:.1}",
        format_timestamp(source.stamp_for(last).timestamp()),
        synthetic_price(args.count - 1),
        mean.value(last)?,
        deviation.get(last)?[1],
        slope.value(last)?,
    );

    // Délier fige le miroir, relier le resynchronise entièrement
    mirror.unlink();
    let frozen_len = mirror.len();
    source.push(synthetic_price(args.count), None)?;
    println!("\nMiroir délié: toujours {} échantillons après une poussée.", mirror.len());
    assert_eq!(mirror.len(), frozen_len);

    mirror.link(&digest)?;
    println!("Miroir relié: resynchronisé sur {} échantillons.", mirror.len());

    // La destruction de la moyenne emporte la variance qui en dépend
    mean.dispose();
    println!(
        "\nAprès dispose de la moyenne: moyenne disposée={} variance disposée={}",
        mean.disposed(),
        deviation.disposed()
    );
    assert!(deviation.disposed());
    assert!(!slope.disposed());

    println!("\n✅ Simulation terminée.");
    Ok(())
}
