use std::sync::atomic::AtomicBool;

/// Question put to the operator: is the face on track `track_id` the
/// student `student_name`?
#[derive(Clone, Debug, PartialEq)]
pub struct ConfirmationRequest {
    pub track_id: u32,
    pub student_id: String,
    pub student_name: String,
    pub distance: f64,
}

/// Capability interface for the human-in-the-loop round trip.
///
/// `confirm` blocks the frame loop until the operator answers. It must
/// return `false` promptly once `cancelled` is set so a session stop is
/// never held up by an unanswered prompt.
pub trait ConfirmationUi: Send {
    fn confirm(&mut self, request: &ConfirmationRequest, cancelled: &AtomicBool) -> bool;
}
