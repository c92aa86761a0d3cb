use crate::sinks::VotingMetricsSink;
use std::time::Instant;

/// RAII timer reporting a vote entry-point's duration on drop.
pub struct VoteTimer<'a> {
    sink: &'a dyn VotingMetricsSink,
    start: Instant,
}

impl<'a> VoteTimer<'a> {
    pub fn new(sink: &'a dyn VotingMetricsSink) -> Self {
        Self {
            sink,
            start: Instant::now(),
        }
    }
}

impl Drop for VoteTimer<'_> {
    fn drop(&mut self) {
        self.sink
            .observe_vote_duration(self.start.elapsed().as_secs_f64());
    }
}
