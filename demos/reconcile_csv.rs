use contribution_deficit::{
    report_to_json, write_report_csv, CsvContributionSource, CsvInspectionSource,
    CsvReferenceSource, DeficitReconciler, ProgressEvent, RunConfig,
};
use std::env;
use std::fs::File;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 4 {
        eprintln!(
            "usage: {} <reference.csv> <inspections.csv> <contributions.csv> [config.json] [report.csv]",
            args[0]
        );
        std::process::exit(2);
    }

    let config = match args.get(4) {
        Some(path) => RunConfig::from_json_file(path)?,
        None => RunConfig::default(),
    };

    let reference = CsvReferenceSource::from_path(&args[1]);
    let inspections = CsvInspectionSource::from_path(&args[2]);
    let contributions = CsvContributionSource::from_path(&args[3]);

    let outcome = DeficitReconciler::new(config)
        .with_progress(|event: ProgressEvent| {
            eprintln!(
                "[progress] {} (taxpayer: {}, rows: {})",
                event.message,
                event.taxpayer_id.as_deref().unwrap_or("-"),
                event
                    .processed
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "-".to_string())
            );
        })
        .run(&reference, &inspections, &contributions)?;

    println!("{}", report_to_json(&outcome.report)?);
    eprintln!(
        "{} rows read ({} rejected), {} deficient months, {} of {} taxpayers reported",
        outcome.summary.rows_read,
        outcome.summary.rows_rejected,
        outcome.summary.deficient_months,
        outcome.summary.taxpayers_reported,
        outcome.summary.taxpayers_seen
    );

    if let Some(path) = args.get(5) {
        write_report_csv(&outcome.report, File::create(path)?)?;
        eprintln!("Report written to {}", path);
    }

    Ok(())
}
