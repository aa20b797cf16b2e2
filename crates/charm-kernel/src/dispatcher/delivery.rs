use super::*;

impl Dispatcher {
    /// Hand `event` to every current observer of its `(source, kind)`, in
    /// registration order.
    pub(super) fn deliver(&mut self, event: &EventRef<'_>) -> Result<(), KernelError> {
        let bindings = self
            .observers
            .handlers_for(event.source.path(), event.kind)
            .to_vec();
        for binding in &bindings {
            let outcome = binding.call(self, event)?;
            self.report.delivered += 1;
            if outcome == Outcome::Deferred {
                self.record_deferral(binding, event)?;
            }
        }
        Ok(())
    }

    /// Queue `event` for `binding`'s observer. The payload is snapshotted here so
    /// an unsupported value fails while the handler's invocation is still on the
    /// stack. Returns whether a new notice was created.
    pub(super) fn record_deferral(
        &mut self,
        binding: &Binding,
        event: &EventRef<'_>,
    ) -> Result<bool, KernelError> {
        if event.source.path() == self.framework.path() {
            return Err(KernelError::CannotDefer(event.kind.to_string()));
        }
        let notice = Notice {
            sequence_id: event.sequence_id,
            event_kind: event.kind.to_string(),
            source_path: event.source.path().to_string(),
            snapshot: event.snapshot()?,
            observer: binding.observer().clone(),
        };
        let created = self.notices.append(notice);
        if created {
            self.report.deferred += 1;
            log::debug!(
                "deferred '{}' (sequence {}) for {}",
                event.kind,
                event.sequence_id,
                binding.observer()
            );
        } else {
            log::debug!(
                "'{}' (sequence {}) already queued for {}",
                event.kind,
                event.sequence_id,
                binding.observer()
            );
        }
        Ok(created)
    }
}
