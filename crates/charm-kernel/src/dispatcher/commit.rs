use super::*;

impl Dispatcher {
    /// Deliver the framework commit events, then write state and the notice
    /// queue in one store transaction.
    pub(super) fn commit(&mut self) -> Result<(), KernelError> {
        let framework = self.framework.clone();
        self.emit(&framework, PRE_COMMIT, &())?;
        self.emit(&framework, COMMIT, &())?;

        let mut changes = Changeset {
            next_sequence: self.next_sequence,
            ..Changeset::default()
        };
        self.report.state_writes = self.state.write_changes(&mut changes);
        self.notices.write_changes(&mut changes);
        self.report.pending = self.notices.len();
        log::debug!(
            "committing {} state bags, {} notices pending",
            self.report.state_writes,
            self.report.pending
        );
        self.store.commit(changes)?;
        Ok(())
    }
}
