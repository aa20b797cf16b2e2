use super::*;

impl Dispatcher {
    /// Redeliver every queued notice, oldest first, to the one handler it names.
    /// Notices deferred while replaying wait for the next invocation.
    pub(super) fn replay(&mut self) -> Result<(), KernelError> {
        let queued: Vec<Notice> = self.notices.pending().cloned().collect();
        for notice in queued {
            if !self.notices.contains(&notice) {
                continue;
            }
            let Some(binding) = self.resolve(&notice) else {
                self.report.lost += 1;
                continue;
            };
            let source = Handle::parse(&notice.source_path).map_err(|err| {
                StoreError::Corrupt(format!(
                    "notice for sequence {} has a bad source: {err}",
                    notice.sequence_id
                ))
            })?;
            let event = EventRef {
                kind: &notice.event_kind,
                source: &source,
                sequence_id: notice.sequence_id,
                payload: PayloadRef::Stored(&notice.snapshot),
                redelivered: true,
            };
            let outcome = match binding.call(self, &event) {
                Ok(outcome) => outcome,
                // A snapshot written by an older payload schema stays queued.
                Err(KernelError::Restore {
                    sequence_id,
                    source: err,
                    ..
                }) if sequence_id == notice.sequence_id => {
                    log::warn!(
                        "cannot restore '{}' (sequence {}) for {}: {err}; notice kept",
                        notice.event_kind,
                        notice.sequence_id,
                        notice.observer
                    );
                    self.report.lost += 1;
                    continue;
                }
                Err(err) => return Err(err),
            };
            self.report.replayed += 1;
            match outcome {
                Outcome::Handled => {
                    self.notices.remove(&notice);
                }
                Outcome::Deferred => {
                    self.record_deferral(&binding, &event)?;
                    self.report.redeferred += 1;
                }
            }
        }
        Ok(())
    }

    /// The live binding a notice names, or a warning saying why there is none.
    fn resolve(&self, notice: &Notice) -> Option<Binding> {
        if !self.objects.contains(&notice.observer.owner_path) {
            log::warn!(
                "owner '{}' of queued '{}' (sequence {}) was not constructed; {} not run, notice kept",
                notice.observer.owner_path,
                notice.event_kind,
                notice.sequence_id,
                notice.observer
            );
            return None;
        }
        let binding = self
            .observers
            .find(&notice.source_path, &notice.event_kind, &notice.observer);
        if binding.is_none() {
            log::warn!(
                "{} no longer observes '{}' on '{}' (sequence {}); notice kept",
                notice.observer,
                notice.event_kind,
                notice.source_path,
                notice.sequence_id
            );
        }
        binding.cloned()
    }
}
