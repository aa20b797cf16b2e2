//! `charm state list` and `charm state get`.

use anyhow::{Result, bail};
use charm_store::{StateKey, Store};
use clap::Args;
use serde_json::{Value as JsonValue, json};

use crate::opts::StoreOpts;
use crate::output::print_success;

#[derive(Args, Debug)]
pub struct StateGetArgs {
    /// Owner handle path (e.g., Charm/Relation[db:4])
    pub owner: String,

    /// Bag name
    pub name: String,
}

pub fn cmd_state_list(opts: &StoreOpts) -> Result<()> {
    let mut store = opts.open_store()?;
    let keys = store.list_state()?;
    store.rollback()?;

    let data = keys
        .iter()
        .map(|key| json!({ "owner_path": key.owner_path, "name": key.name }))
        .collect();
    let lines = keys.iter().map(StateKey::to_string).collect();
    print_success(opts, JsonValue::Array(data), lines)
}

pub fn cmd_state_get(opts: &StoreOpts, args: &StateGetArgs) -> Result<()> {
    let key = StateKey::new(args.owner.as_str(), args.name.as_str());
    let mut store = opts.open_store()?;
    let value = store.load_state(&key)?;
    store.rollback()?;

    let Some(value) = value else {
        bail!("no stored state for {key}");
    };
    let json = value.to_json()?;
    let pretty = serde_json::to_string_pretty(&json)?;
    print_success(opts, json, vec![pretty])
}
