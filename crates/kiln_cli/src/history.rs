//! `kiln history`: show build history records.

use kiln_cache::BuildHistoryRecord;
use kiln_common::Guid;

use crate::project::open_project;
use crate::{GlobalArgs, HistoryArgs};

/// Runs the `kiln history` command.
///
/// Returns exit code 1 when a requested identifier has no record.
pub fn run(args: &HistoryArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let history = open_project(global)?.history();

    if let Some(guid) = &args.guid {
        let guid: Guid = guid.parse()?;
        return match history.get(guid) {
            Some(record) => {
                print!("{}", render_record(guid, &record));
                Ok(0)
            }
            None => {
                eprintln!("error: no history record for {guid}");
                Ok(1)
            }
        };
    }

    let mut records = history.records();
    records.sort_by(|a, b| a.0.cmp(&b.0));
    for (guid, record) in &records {
        println!(
            "{guid}  {} v{}  {}",
            record.pipeline, record.pipeline_version, record.combined
        );
    }
    if !global.quiet {
        eprintln!("{} records", records.len());
    }
    Ok(0)
}

/// Formats one record in full.
fn render_record(guid: Guid, record: &BuildHistoryRecord) -> String {
    let mut out = format!(
        "guid      {guid}\npipeline  {} v{}\nlocal     {}\ncombined  {}\n",
        record.pipeline, record.pipeline_version, record.local, record.combined
    );
    for (path, stamp) in &record.file_timestamps {
        out.push_str(&format!("file      {path} @ {stamp}\n"));
    }
    out
}
