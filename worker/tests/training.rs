mod common;

use std::{
    path::PathBuf,
    sync::{Arc, atomic::Ordering},
    time::Duration,
};

use comms::{
    Topic,
    channel::{MemoryChannel, Written},
    specs::{HttpMethod, JobKind, JobTypeSpec, TrainStatus},
    storage::LocalStorage,
    wallet::StaticWallet,
};
use common::{FakeRuntime, TestStorage, eventually, training_update};
use serde_json::json;
use tempfile::TempDir;
use tokio::task::JoinSet;
use worker::{NodeConfig, Worker, WorkerBuilder, train::TrainState};

const SLOT: &str = "worker-train";

struct Harness {
    worker: Worker,
    runtime: Arc<FakeRuntime>,
    channel: Arc<MemoryChannel>,
    storage: Arc<TestStorage>,
    shared: TempDir,
    store: TempDir,
    _tasks: JoinSet<()>,
}

impl Harness {
    async fn start(runtime: FakeRuntime) -> Self {
        Self::start_with(runtime, |_| {}).await
    }

    /// Starts a worker after `prepare` has set up the storage switches.
    async fn start_with(runtime: FakeRuntime, prepare: impl FnOnce(&TestStorage)) -> Self {
        let shared = tempfile::tempdir().unwrap();
        let store = tempfile::tempdir().unwrap();

        let config = NodeConfig::from_json(
            &json!({
                "TRAIN_MODE": true,
                "GPU_DEVICE_NUMBER": "0",
                "ETH_ADDRESS": "0xowner",
                "SHARED_ROOT_PATH": shared.path(),
                "LOG_POLL_MS": 10,
                "ENABLE_AUTO_PAYOUT": false,
                "WORKER_INFO_UPDATE_MS": 3_600_000,
            })
            .to_string(),
        )
        .unwrap();

        let trainer = JobTypeSpec {
            kind: JobKind::Training,
            image: "trainer:1".into(),
            framework: None,
            port: None,
            api_path: None,
            health_check_path: None,
            method: HttpMethod::Post,
        };
        let channel = Arc::new(MemoryChannel::new("0xworker").with_job_type("mnist", trainer));
        let runtime = Arc::new(runtime);

        let storage = LocalStorage::new(store.path());
        let dataset = storage.object_path("/trainData/u1/t1/data.zip");
        std::fs::create_dir_all(dataset.parent().unwrap()).unwrap();
        std::fs::write(&dataset, b"dataset").unwrap();
        let storage = Arc::new(TestStorage::new(storage));
        prepare(&storage);

        let worker = WorkerBuilder::new(config)
            .runtime(runtime.clone())
            .channel(channel.clone())
            .storage(storage.clone())
            .wallet(Arc::new(StaticWallet::new("0xworker")))
            .started_at(1_000)
            .build()
            .unwrap();
        let tasks = worker.start().await.unwrap();

        Self {
            worker,
            runtime,
            channel,
            storage,
            shared,
            store,
            _tasks: tasks,
        }
    }

    fn job_dir(&self, train_id: &str) -> PathBuf {
        self.shared.path().join("train").join(train_id)
    }

    fn request(&self, train_id: &str, job_type: &str) {
        self.channel.publish(
            Topic::Training,
            train_id,
            json!({
                "jobType": job_type,
                "epochs": 2,
                "uid": "u1",
                "fileName": "data.zip",
                "userAddress": "0xuser",
                "requestedAt": 2_000,
                "params": { "client": "test" },
            }),
        );
    }

    fn cancel(&self, cancel_id: &str, train_id: &str, need_save: bool) {
        self.channel.publish(
            Topic::TrainingCancel,
            cancel_id,
            json!({ "trainId": train_id, "needSave": need_save, "requestedAt": 2_000 }),
        );
    }

    async fn status(&self, train_id: &str, status: TrainStatus) -> comms::specs::TrainingUpdate {
        training_update(&self.channel, train_id, |u| u.status == Some(status)).await
    }

    async fn wait_idle(&self) {
        eventually(|| self.worker.train_state() == TrainState::Idle).await;
    }

    fn write_output(&self, train_id: &str) {
        std::fs::write(self.job_dir(train_id).join("mnist.mar"), b"model").unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn completed_job_streams_progress_and_uploads_the_model() {
    let h = Harness::start(FakeRuntime::default().with_image("trainer:1")).await;
    h.request("t1", "mnist");

    let running = h.status("t1", TrainStatus::Running).await;
    assert!(running.started_at.is_some());
    let params = running.params.unwrap();
    assert_eq!(params["client"], json!("test"));
    assert_eq!(params["trainId"], json!("t1"));
    assert_eq!(params["address"], json!("0xworker"));

    let container = h.runtime.container(SLOT).unwrap();
    assert!(container.started);
    assert_eq!(container.spec.image, "trainer:1");
    assert!(container.spec.env.contains(&"epochs=2".to_string()));
    assert!(container.spec.env.contains(&"outputPath=/train/t1/mnist.mar".to_string()));
    let bind = format!("{}/train/t1:/train/t1", h.shared.path().display());
    assert_eq!(container.spec.binds, vec![bind]);
    assert!(h.job_dir("t1").join("data.zip").exists());

    h.runtime.emit_log(SLOT, "epoch 1/2\n");
    let chunk = training_update(&h.channel, "t1", |u| u.logs.is_some()).await;
    let logs = chunk.logs.unwrap();
    assert_eq!(logs.values().next().map(String::as_str), Some("epoch 1/2\n"));

    std::fs::write(h.job_dir("t1").join("logs/log.json"), r#"{"epoch":1,"loss":0.5}"#).unwrap();
    let progress = training_update(&h.channel, "t1", |u| u.log.is_some()).await;
    assert_eq!(progress.log, Some(json!({ "epoch": 1, "loss": 0.5 })));

    h.write_output("t1");
    h.runtime.end_logs(SLOT);

    let done = h.status("t1", TrainStatus::Completed).await;
    assert_eq!(done.model_name.as_deref(), Some("mnist.mar"));
    assert_eq!(done.err_message, None);

    h.wait_idle().await;
    let uploaded = h.store.path().join("trainResult/t1/0xworker/mnist.mar");
    assert_eq!(std::fs::read(uploaded).unwrap(), b"model");
    eventually(|| !h.job_dir("t1").exists()).await;
    assert!(h.runtime.container_names().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn job_without_output_fails() {
    let h = Harness::start(FakeRuntime::default().with_image("trainer:1")).await;
    h.request("t1", "mnist");
    h.status("t1", TrainStatus::Running).await;

    h.runtime.end_logs(SLOT);

    let done = h.status("t1", TrainStatus::Failed).await;
    assert_eq!(done.err_message.as_deref(), Some("Failed to train"));
    h.wait_idle().await;
    assert!(!h.store.path().join("trainResult").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn broken_log_stream_fails_the_job() {
    let h = Harness::start(FakeRuntime::default().with_image("trainer:1")).await;
    h.request("t1", "mnist");
    h.status("t1", TrainStatus::Running).await;

    h.write_output("t1");
    h.runtime.fail_logs(SLOT);

    h.status("t1", TrainStatus::Failed).await;
    h.wait_idle().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_interrupts_the_training_process() {
    let h = Harness::start(FakeRuntime::default().with_image("trainer:1")).await;
    h.request("t1", "mnist");
    h.status("t1", TrainStatus::Running).await;

    h.write_output("t1");
    h.cancel("c1", "t1", false);

    let done = h.status("t1", TrainStatus::Canceled).await;
    assert_eq!(done.model_name.as_deref(), Some("mnist.mar"));
    h.wait_idle().await;

    let execs = h.runtime.state.lock().execs.clone();
    assert_eq!(execs.len(), 1);
    let script = execs[0].1.last().unwrap();
    assert!(script.contains("grep 'python'"));
    assert!(script.contains("kill -INT"));
    assert!(!h.store.path().join("trainResult").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_with_save_keeps_a_finished_model() {
    let h = Harness::start(FakeRuntime::default().with_image("trainer:1")).await;
    h.request("t1", "mnist");
    h.status("t1", TrainStatus::Running).await;

    h.write_output("t1");
    h.cancel("c1", "t1", true);

    h.status("t1", TrainStatus::Completed).await;
    h.wait_idle().await;
    assert!(h.store.path().join("trainResult/t1/0xworker/mnist.mar").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_request_is_refused_while_busy() {
    let h = Harness::start(FakeRuntime::default().with_image("trainer:1")).await;
    h.request("t1", "mnist");
    h.status("t1", TrainStatus::Running).await;

    h.request("t2", "mnist");
    let refused = training_update(&h.channel, "t2", |u| u.err_message.is_some()).await;
    assert_eq!(refused.err_message.as_deref(), Some("Already running"));
    assert_eq!(refused.status, None);
    assert_eq!(refused.params.unwrap()["trainId"], json!("t2"));

    assert_eq!(h.runtime.container_names(), vec![SLOT.to_string()]);
    h.runtime.end_logs(SLOT);
    h.wait_idle().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_while_pulling_abandons_the_job() {
    let runtime = FakeRuntime::default();
    runtime.pull_gate.arm();
    let h = Harness::start(runtime).await;

    h.request("t1", "mnist");
    h.runtime.pull_gate.entered().await;
    h.cancel("c1", "t1", false);

    let done = h.status("t1", TrainStatus::Canceled).await;
    assert!(done.params.is_some());
    h.wait_idle().await;

    assert!(h.runtime.container_names().is_empty());
    assert_eq!(h.runtime.state.lock().created, 0);
    assert!(!h.job_dir("t1").exists());
    assert!(!h.channel.writes().iter().any(|w| matches!(
        w,
        Written::Training { update, .. } if update.status == Some(TrainStatus::Running)
    )));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn replayed_requests_are_ignored() {
    let h = Harness::start(FakeRuntime::default().with_image("trainer:1")).await;
    h.channel.publish(
        Topic::Training,
        "old",
        json!({
            "jobType": "mnist",
            "epochs": 2,
            "uid": "u1",
            "fileName": "data.zip",
            "userAddress": "0xuser",
            "requestedAt": 500,
        }),
    );
    h.request("t9", "nope");

    training_update(&h.channel, "t9", |u| u.err_message.is_some()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(!h.channel.writes().iter().any(|w| matches!(
        w,
        Written::Training { train_id, .. } if train_id == "old"
    )));
    assert_eq!(h.runtime.state.lock().created, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_or_malformed_requests_get_invalid_params() {
    let h = Harness::start(FakeRuntime::default().with_image("trainer:1")).await;

    h.request("t1", "nope");
    let refused = training_update(&h.channel, "t1", |u| u.err_message.is_some()).await;
    assert_eq!(refused.err_message.as_deref(), Some("Invalid Params"));

    h.channel.publish(
        Topic::Training,
        "t2",
        json!({ "userAddress": "0xuser", "requestedAt": 2_000, "epochs": "many" }),
    );
    let refused = training_update(&h.channel, "t2", |u| u.err_message.is_some()).await;
    assert_eq!(refused.err_message.as_deref(), Some("Invalid Params"));

    assert_eq!(h.worker.train_state(), TrainState::Idle);
    assert_eq!(h.runtime.state.lock().created, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_upload_fails_the_job() {
    let h = Harness::start_with(FakeRuntime::default().with_image("trainer:1"), |storage| {
        storage.fail_upload.store(true, Ordering::SeqCst);
    })
    .await;
    h.request("t1", "mnist");
    h.status("t1", TrainStatus::Running).await;

    h.write_output("t1");
    h.runtime.end_logs(SLOT);

    let done = h.status("t1", TrainStatus::Failed).await;
    let message = done.err_message.unwrap();
    assert!(message.starts_with("Failed to upload model"), "{message}");
    h.wait_idle().await;
    assert!(!h.store.path().join("trainResult").exists());
    assert!(h.runtime.container_names().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_while_downloading_never_creates_a_container() {
    let h = Harness::start_with(FakeRuntime::default().with_image("trainer:1"), |storage| {
        storage.download_gate.arm();
    })
    .await;
    h.request("t1", "mnist");
    h.storage.download_gate.entered().await;

    h.cancel("c1", "t1", false);
    eventually(|| {
        matches!(h.worker.train_state(), TrainState::Downloading(job) if job.cancel.is_some())
    })
    .await;
    h.storage.download_gate.open();

    let done = h.status("t1", TrainStatus::Canceled).await;
    assert!(done.params.is_some());
    h.wait_idle().await;

    assert_eq!(h.runtime.state.lock().created, 0);
    assert!(h.runtime.container_names().is_empty());
    assert!(!h.job_dir("t1").exists());
}
