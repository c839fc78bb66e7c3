//! The training slot's lifecycle.
//!
//! A node runs at most one training job. Its state moves
//! `Idle -> Downloading -> Running -> Finalizing -> Idle`, with a cancel mark that can
//! be attached while downloading or running. The final status is decided from that
//! mark and whether the job produced its output.

use comms::specs::TrainStatus;

use crate::{Result, WorkerErr};

/// Container slot used for training jobs.
pub const TRAIN_SLOT: &str = "worker-train";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelMark {
    pub cancel_id: String,
    /// Keep the trained model if the job manages to write it before stopping.
    pub need_save: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainJob {
    pub train_id: String,
    pub user_addr: String,
    pub cancel: Option<CancelMark>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TrainState {
    #[default]
    Idle,
    Downloading(TrainJob),
    Running(TrainJob),
    Finalizing(TrainJob),
}

/// Where a cancel request found the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelPhase {
    /// No job with that id is cancellable.
    Unknown,
    Downloading,
    Running,
}

impl TrainState {
    pub fn is_busy(&self) -> bool {
        !matches!(self, TrainState::Idle)
    }

    pub fn job(&self) -> Option<&TrainJob> {
        match self {
            TrainState::Idle => None,
            TrainState::Downloading(job) | TrainState::Running(job) | TrainState::Finalizing(job) => {
                Some(job)
            }
        }
    }

    fn is_job(&self, train_id: &str) -> bool {
        self.job().is_some_and(|job| job.train_id == train_id)
    }

    /// Claims the slot for `train_id`; refused without any change when busy.
    pub fn begin(&mut self, train_id: &str, user_addr: &str) -> Result<()> {
        if self.is_busy() {
            return Err(WorkerErr::Busy);
        }

        *self = TrainState::Downloading(TrainJob {
            train_id: train_id.to_string(),
            user_addr: user_addr.to_string(),
            cancel: None,
        });
        Ok(())
    }

    /// Moves a downloaded job on to running, unless it was canceled meanwhile.
    pub fn mark_running(&mut self, train_id: &str) -> Result<()> {
        match self {
            TrainState::Downloading(job) if job.train_id == train_id => {
                if job.cancel.is_some() {
                    return Err(WorkerErr::Canceled(train_id.to_string()));
                }
                *self = TrainState::Running(job.clone());
                Ok(())
            }
            _ => Err(WorkerErr::Canceled(train_id.to_string())),
        }
    }

    /// Attaches a cancel mark to `train_id` if it can still be canceled.
    pub fn request_cancel(&mut self, train_id: &str, mark: CancelMark) -> CancelPhase {
        match self {
            TrainState::Downloading(job) if job.train_id == train_id => {
                job.cancel = Some(mark);
                CancelPhase::Downloading
            }
            TrainState::Running(job) if job.train_id == train_id => {
                job.cancel = Some(mark);
                CancelPhase::Running
            }
            _ => CancelPhase::Unknown,
        }
    }

    pub fn cancel_mark(&self, train_id: &str) -> Option<&CancelMark> {
        self.job()
            .filter(|job| job.train_id == train_id)
            .and_then(|job| job.cancel.as_ref())
    }

    /// Freezes a running job for finalization, returning its final snapshot.
    pub fn begin_finalizing(&mut self, train_id: &str) -> Option<TrainJob> {
        match self {
            TrainState::Running(job) if job.train_id == train_id => {
                let job = job.clone();
                *self = TrainState::Finalizing(job.clone());
                Some(job)
            }
            _ => None,
        }
    }

    /// Frees the slot if it still belongs to `train_id`.
    pub fn finish(&mut self, train_id: &str) {
        if self.is_job(train_id) {
            *self = TrainState::Idle;
        }
    }
}

/// Final status of a job whose container exited.
pub fn resolve_status(cancel: Option<&CancelMark>, output_exists: bool) -> TrainStatus {
    match (cancel, output_exists) {
        (None, true) => TrainStatus::Completed,
        (None, false) => TrainStatus::Failed,
        (Some(mark), true) if mark.need_save => TrainStatus::Completed,
        (Some(_), _) => TrainStatus::Canceled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mark(need_save: bool) -> CancelMark {
        CancelMark {
            cancel_id: "c1".into(),
            need_save,
        }
    }

    #[test]
    fn final_status_matrix() {
        assert_eq!(resolve_status(None, true), TrainStatus::Completed);
        assert_eq!(resolve_status(None, false), TrainStatus::Failed);
        assert_eq!(resolve_status(Some(&mark(true)), true), TrainStatus::Completed);
        assert_eq!(resolve_status(Some(&mark(true)), false), TrainStatus::Canceled);
        assert_eq!(resolve_status(Some(&mark(false)), true), TrainStatus::Canceled);
        assert_eq!(resolve_status(Some(&mark(false)), false), TrainStatus::Canceled);
    }

    #[test]
    fn busy_slot_rejects_without_changes() {
        let mut state = TrainState::default();
        state.begin("t1", "0xa").unwrap();
        let before = state.clone();

        assert!(matches!(state.begin("t2", "0xb"), Err(WorkerErr::Busy)));
        assert_eq!(state, before);
    }

    #[test]
    fn cancel_during_download_blocks_the_start() {
        let mut state = TrainState::default();
        state.begin("t1", "0xa").unwrap();

        assert_eq!(state.request_cancel("other", mark(false)), CancelPhase::Unknown);
        assert_eq!(state.request_cancel("t1", mark(false)), CancelPhase::Downloading);
        assert!(matches!(state.mark_running("t1"), Err(WorkerErr::Canceled(_))));

        state.finish("t1");
        assert_eq!(state, TrainState::Idle);
    }

    #[test]
    fn finalizing_is_busy_and_not_cancellable() {
        let mut state = TrainState::default();
        state.begin("t1", "0xa").unwrap();
        state.mark_running("t1").unwrap();
        state.request_cancel("t1", mark(true));

        let job = state.begin_finalizing("t1").unwrap();
        assert_eq!(job.cancel, Some(mark(true)));
        assert!(state.is_busy());
        assert_eq!(state.request_cancel("t1", mark(false)), CancelPhase::Unknown);
        assert!(state.begin_finalizing("t1").is_none());

        state.finish("other");
        assert!(state.is_busy());
        state.finish("t1");
        assert!(!state.is_busy());
    }
}
