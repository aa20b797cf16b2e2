//! `charm notices` command.

use anyhow::Result;
use charm_store::{Notice, Store};
use serde_json::{Value as JsonValue, json};

use crate::opts::StoreOpts;
use crate::output::print_success;

pub fn cmd_notices(opts: &StoreOpts) -> Result<()> {
    let mut store = opts.open_store()?;
    let notices = store.load_notices()?;
    store.rollback()?;

    let mut data = Vec::with_capacity(notices.len());
    let mut lines = Vec::with_capacity(notices.len());
    for entry in &notices {
        data.push(notice_json(&entry.notice)?);
        lines.push(format!(
            "#{} {} from {} -> {}",
            entry.notice.sequence_id,
            entry.notice.event_kind,
            entry.notice.source_path,
            entry.notice.observer
        ));
    }
    if lines.is_empty() {
        lines.push("no queued notices".into());
    }
    print_success(opts, JsonValue::Array(data), lines)
}

fn notice_json(notice: &Notice) -> Result<JsonValue> {
    Ok(json!({
        "sequence_id": notice.sequence_id,
        "event_kind": notice.event_kind,
        "source_path": notice.source_path,
        "observer_owner_path": notice.observer.owner_path,
        "observer_handler_name": notice.observer.handler_name,
        "snapshot": notice.snapshot.to_json()?,
    }))
}
