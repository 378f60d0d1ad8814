use appointment_cache::{Slot, TraceId};
use tracing::{debug, warn};

/// One queue message worth of slots
#[derive(Debug, Clone)]
pub struct NotificationBatch {
    /// Slots in the batch, in input order
    pub slots: Vec<Slot>,
    /// JSON array body sent to the queue
    pub payload: String,
}

impl NotificationBatch {
    fn from_parts(slots: Vec<Slot>, encoded: &[String]) -> Self {
        let payload = format!("[{}]", encoded.join(","));
        Self { slots, payload }
    }

    /// Size of the payload in bytes
    pub fn len_bytes(&self) -> usize {
        self.payload.len()
    }
}

/// Split `slots` into queue batches whose JSON body fits in `max_bytes`.
///
/// Slots are added greedily in order and never split. A slot that is larger
/// than the budget on its own is sent alone.
pub fn chunk_for_queue(
    slots: &[Slot],
    max_bytes: usize,
    trace: &TraceId,
) -> Result<Vec<NotificationBatch>, serde_json::Error> {
    let mut batches = Vec::new();
    let mut current: Vec<Slot> = Vec::new();
    let mut encoded: Vec<String> = Vec::new();
    // "[]" framing
    let mut size = 2;

    for slot in slots {
        let json = serde_json::to_string(slot)?;
        let separator = usize::from(!encoded.is_empty());

        if !encoded.is_empty() && size + separator + json.len() > max_bytes {
            batches.push(NotificationBatch::from_parts(std::mem::take(&mut current), &encoded));
            encoded.clear();
            size = 2;
        }

        if encoded.is_empty() && 2 + json.len() > max_bytes {
            warn!(
                trace_id = %trace,
                "Slot {} alone is {} bytes, over the {} byte budget",
                slot.identity_key(),
                json.len() + 2,
                max_bytes
            );
        }

        size += usize::from(!encoded.is_empty()) + json.len();
        encoded.push(json);
        current.push(slot.clone());
    }

    if !current.is_empty() {
        batches.push(NotificationBatch::from_parts(current, &encoded));
    }

    debug!(trace_id = %trace, "Chunked {} slots into {} batches", slots.len(), batches.len());
    Ok(batches)
}
