//! `charm ack`: drop queued notices for an observer that will never be
//! constructed again.

use anyhow::Result;
use charm_store::{Changeset, NoticeLog, ObserverRef, Store};
use clap::Args;
use serde_json::json;

use crate::opts::StoreOpts;
use crate::output::print_success;

#[derive(Args, Debug)]
pub struct AckArgs {
    /// Observer owner handle path
    pub owner: String,

    /// Handler name
    pub handler: String,
}

pub fn cmd_ack(opts: &StoreOpts, args: &AckArgs) -> Result<()> {
    let mut store = opts.open_store()?;
    let mut log = NoticeLog::from_stored(store.load_notices()?);
    let removed = log.remove_observer(&args.owner, &args.handler);
    if removed == 0 {
        store.rollback()?;
    } else {
        let mut changes = Changeset {
            next_sequence: store.next_sequence()?,
            ..Changeset::default()
        };
        log.write_changes(&mut changes);
        store.commit(changes)?;
    }

    let observer = ObserverRef::new(args.owner.as_str(), args.handler.as_str());
    print_success(
        opts,
        json!({ "observer": observer.to_string(), "removed": removed }),
        vec![format!("acknowledged {removed} notices for {observer}")],
    )
}
