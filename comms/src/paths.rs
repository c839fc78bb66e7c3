//! Realtime-database and storage locations shared by the channel and the worker.

/// Inference requests addressed to a worker.
pub fn inference(addr: &str) -> String {
    format!("/inference/{addr}")
}

pub fn inference_result(request_id: &str, addr: &str) -> String {
    format!("/inference_result/{request_id}/{addr}")
}

/// Training requests addressed to a worker.
pub fn training(addr: &str) -> String {
    format!("/training/{addr}")
}

pub fn training_cancel(addr: &str) -> String {
    format!("/training_cancel/{addr}")
}

/// Where status updates of a single training job are written.
pub fn training_result(train_id: &str, user_addr: &str, addr: &str) -> String {
    format!("/training_result/{train_id}/{user_addr}/{addr}")
}

pub fn worker_info(addr: &str) -> String {
    format!("/worker_info/{addr}")
}

pub fn user_transactions(addr: &str) -> String {
    format!("/user_transactions/{addr}")
}

pub fn job_type(name: &str) -> String {
    format!("/job_types/{name}")
}

/// Storage location of a dataset uploaded by `uid` for a training job.
pub fn dataset(uid: &str, train_id: &str, file_name: &str) -> String {
    format!("/trainData/{uid}/{train_id}/{file_name}")
}

/// Storage location the trained model is uploaded to.
pub fn train_result(train_id: &str, addr: &str, file_name: &str) -> String {
    format!("/trainResult/{train_id}/{addr}/{file_name}")
}
