//! Human mode prints one line per item to stdout; JSON mode wraps the data in
//! `{ "data": ... }`.

use anyhow::Result;
use serde_json::{Value, json};

use crate::opts::StoreOpts;

pub fn print_success(opts: &StoreOpts, data: Value, lines: Vec<String>) -> Result<()> {
    if opts.json {
        println!("{}", serde_json::to_string(&json!({ "data": data }))?);
    } else {
        for line in lines {
            println!("{line}");
        }
    }
    Ok(())
}
