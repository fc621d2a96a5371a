/// Machine state of the fax decoder.
///
/// Transitions are synchronous within one per-sample step and may cascade
/// through several states for the same input sample, but never revisit a
/// state within that sample.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum State {
    /// No signal above the gain threshold.
    #[default]
    WaitSignal,
    /// Signal present, waiting for the start tone to begin.
    WaitStartBegin,
    /// Start tone heard, waiting for it to end.
    WaitStartEnd,
    /// Waiting for a line boundary to begin the synchronization search.
    WaitFirstLine,
    /// Accumulating phasing lines into the sync correlator.
    Sync,
    /// Offset found, waiting for a line boundary to begin pixel output.
    WaitLineLock,
    /// Emitting pixels.
    Scan,
    /// Finalize the image and return to acquisition.
    Finish,
}

impl State {
    pub fn is_receiving(&self) -> bool {
        !matches!(
            self,
            State::WaitSignal | State::WaitStartBegin | State::Finish
        )
    }
}
