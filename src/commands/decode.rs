//! Decode one XML file from disk and print the partial updates. Operator
//! tooling for eyeballing what a captured payload turns into.

use anyhow::{Context, Result, bail};

use crate::{sfdps, smes, tais, tdes, xmltree};

pub fn handle_decode(path: &str) -> Result<()> {
    let payload =
        std::fs::read_to_string(path).with_context(|| format!("cannot read {path}"))?;
    let root = xmltree::parse(&payload)?;
    match root.name.as_str() {
        "asdexMsg" => {
            let batch = smes::decode(&payload)?;
            println!("airport: {}", batch.airport);
            for update in batch.updates {
                println!("{update:#?}");
            }
        }
        "TATrackAndFlightPlan" => {
            let batch = tais::decode(&payload)?;
            println!("facility: {}", batch.facility);
            for update in batch.updates {
                println!("{update:#?}");
            }
        }
        "TDLSCSPMessage" | "TowerDepartureEventMessage" | "DATISData" => {
            match tdes::decode(&payload)? {
                tdes::TdesOutcome::Event(update) => println!("{update:#?}"),
                tdes::TdesOutcome::Ignored => println!("ignored root {}", root.name),
            }
        }
        _ => {
            let batch = sfdps::decode(&payload)?;
            if batch.updates.is_empty() && batch.dropped == 0 {
                bail!("no flight elements under root {}", root.name);
            }
            for update in batch.updates {
                println!("{update:#?}");
            }
            if batch.dropped > 0 {
                println!("(dropped {} flight elements without a gufi)", batch.dropped);
            }
        }
    }
    Ok(())
}
