//! Files written at the end of a run.
//!
//! ```text
//! json_output_dir/
//! ├── 2025-05-06/
//! │   ├── report_061502.json   # one per run, named by UTC start time
//! │   └── report_181944.json
//! └── word_stats.json          # latest statistics, overwritten each run
//! ```

pub mod json;
