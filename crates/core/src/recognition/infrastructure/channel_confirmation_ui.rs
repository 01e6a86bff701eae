use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::recognition::domain::confirmation_ui::{ConfirmationRequest, ConfirmationUi};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A pending operator question. Dropping it unanswered counts as "no".
pub struct ConfirmationPrompt {
    pub request: ConfirmationRequest,
    reply: Sender<bool>,
}

impl ConfirmationPrompt {
    pub fn answer(self, confirmed: bool) {
        let _ = self.reply.send(confirmed);
    }
}

/// Confirmation round trip over a channel: the frame loop sends a prompt
/// and blocks for the reply, which an operator-facing thread (terminal,
/// kiosk UI, web relay) sends back.
///
/// The wait ends early on cancellation and, when configured, after
/// `timeout`; both count as a negative answer.
pub struct ChannelConfirmationUi {
    prompts: Sender<ConfirmationPrompt>,
    timeout: Option<Duration>,
}

impl ChannelConfirmationUi {
    pub fn new(timeout: Option<Duration>) -> (Self, Receiver<ConfirmationPrompt>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (
            Self {
                prompts: tx,
                timeout,
            },
            rx,
        )
    }
}

impl ConfirmationUi for ChannelConfirmationUi {
    fn confirm(&mut self, request: &ConfirmationRequest, cancelled: &AtomicBool) -> bool {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        let prompt = ConfirmationPrompt {
            request: request.clone(),
            reply: reply_tx,
        };
        if self.prompts.send(prompt).is_err() {
            log::warn!("No operator attached; treating prompt as declined");
            return false;
        }

        let deadline = self.timeout.map(|t| Instant::now() + t);
        loop {
            if cancelled.load(Ordering::Relaxed) {
                return false;
            }
            let wait = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        log::info!(
                            "Confirmation for {} timed out; treating as declined",
                            request.student_name
                        );
                        return false;
                    }
                    (d - now).min(POLL_INTERVAL)
                }
                None => POLL_INTERVAL,
            };
            match reply_rx.recv_timeout(wait) {
                Ok(answer) => return answer,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
    }
}
