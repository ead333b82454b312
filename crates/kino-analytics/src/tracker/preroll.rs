//! Preroll event reordering

use super::event::RuleName;

/// Order queued preroll events for replay
///
/// Play events queued ahead of the first ad break start are dropped, since
/// the pending ad break owns playback. Everything else keeps its order.
pub fn reorder<T>(queue: Vec<(RuleName, T)>) -> Vec<(RuleName, T)> {
    let mut drop_play = queue
        .iter()
        .any(|(rule, _)| *rule == RuleName::AdBreakStart);

    let mut ordered = Vec::with_capacity(queue.len());
    for (rule, item) in queue {
        if rule == RuleName::Play && drop_play {
            continue;
        }
        if rule == RuleName::AdBreakStart {
            drop_play = false;
        }
        ordered.push((rule, item));
    }
    ordered
}
