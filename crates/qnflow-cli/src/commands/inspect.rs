//! Calibration-file inspection: runs, sub-events, steps, histogram shapes.

use qnflow_core::store::HistogramPayload;
use qnflow_core::{CalibrationStore, Result};

pub fn run(path: &str, show_qa: bool) -> Result<()> {
    let store = CalibrationStore::load(path)?;
    if store.is_empty() {
        println!("{path}: empty calibration file");
        return Ok(());
    }

    let mut runs: Vec<&str> = store.run_names().collect();
    runs.sort_unstable();

    for run in runs {
        println!("run '{run}':");
        let Some(histograms) = store.run(run) else { continue };

        let mut subevents: Vec<&String> = histograms.keys().collect();
        subevents.sort_unstable();
        for subevent in subevents {
            println!("  {subevent}:");
            let steps = &histograms[subevent];
            let mut names: Vec<&String> = steps.keys().collect();
            names.sort_unstable();
            for name in names {
                println!("    {:<20} {}", name, describe(&steps[name]));
            }
        }

        if show_qa {
            if let Some(qa) = store.qa(run) {
                for (subevent, steps) in &qa.not_validated {
                    for (step, hist) in steps {
                        println!(
                            "  qa: {subevent}/{step} not-validated tallies: {} over {} bin(s)",
                            hist.total(),
                            hist.bins()
                        );
                    }
                }
            }
        }
    }
    Ok(())
}

fn describe(payload: &HistogramPayload) -> String {
    match payload {
        HistogramPayload::Components(p) => format!(
            "components profile, {} event bin(s), harmonic mask {:#04b}",
            p.bins(),
            p.harmonic_mask()
        ),
        HistogramPayload::Channel { channels, groups } => {
            let groups = match groups {
                Some(g) => format!(", {} group(s)", g.slots()),
                None => String::new(),
            };
            format!(
                "channel profile, {} event bin(s) x {} channel(s){groups}",
                channels.event_bins(),
                channels.slots()
            )
        }
        HistogramPayload::Correlation(p) => {
            format!("correlation profile, {} event bin(s)", p.bins())
        }
        HistogramPayload::ThreeDetector(p) => format!(
            "three-detector profile, {} event bin(s), harmonic mask {:#04b}",
            p.bins(),
            p.harmonic_mask()
        ),
    }
}
