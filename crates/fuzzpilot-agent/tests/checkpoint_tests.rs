use std::fs;

use fuzzpilot_agent::{
    Checkpoint, CheckpointError, PpoAgent, PpoConfig, StateVector, Transition, CHECKPOINT_VERSION,
};

fn config() -> PpoConfig {
    PpoConfig {
        hidden_layers: vec![8, 8],
        batch_size: 4,
        seed: 11,
        ..Default::default()
    }
}

fn trained_agent() -> PpoAgent {
    let mut agent = PpoAgent::new(config());
    let state = StateVector([1.0, 0.02, 0.5, 0.1, 0.01]);
    for i in 0..4 {
        let sample = agent.select_action(&state).unwrap();
        agent.store_transition(Transition {
            state,
            action: sample.action,
            reward: i as f64,
            log_prob: sample.log_prob,
            value: sample.value,
            done: i == 3,
        });
    }
    agent.update().unwrap();
    agent
}

#[test]
fn test_resume_reproduces_decisions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("agent.json");

    let mut original = trained_agent();
    original.save_checkpoint(&path).unwrap();
    let mut resumed = PpoAgent::load(config(), &path).unwrap();

    assert_eq!(resumed.model(), original.model());
    assert_eq!(resumed.updates(), 1);
    assert!(resumed.buffer().is_empty());

    let state = StateVector([2.0, 0.0, 1.2, 0.3, 0.02]);
    for _ in 0..10 {
        assert_eq!(
            original.select_action(&state).unwrap(),
            resumed.select_action(&state).unwrap()
        );
    }
}

#[test]
fn test_save_replaces_previous_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("agent.json");

    PpoAgent::new(config()).save_checkpoint(&path).unwrap();
    let agent = trained_agent();
    agent.save_checkpoint(&path).unwrap();

    let loaded = Checkpoint::load(&path).unwrap();
    assert_eq!(loaded.updates, 1);
    assert_eq!(&loaded.model, agent.model());
    assert!(!dir.path().join("agent.json.tmp").exists());
}

#[test]
fn test_shape_mismatch_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("agent.json");
    PpoAgent::new(config()).save_checkpoint(&path).unwrap();

    let wider = PpoConfig {
        hidden_layers: vec![16, 8],
        ..config()
    };
    let err = PpoAgent::load(wider, &path).err().unwrap();
    match err {
        CheckpointError::ShapeMismatch { expected, found } => {
            assert_eq!(expected, vec![5, 16, 8, 5]);
            assert_eq!(found, vec![5, 8, 8, 5]);
        }
        other => panic!("expected shape mismatch, got {other:?}"),
    }
}

#[test]
fn test_unsupported_version_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("agent.json");
    let mut checkpoint = PpoAgent::new(config()).checkpoint();
    checkpoint.version = CHECKPOINT_VERSION + 1;
    checkpoint.save(&path).unwrap();

    let err = Checkpoint::load(&path).unwrap_err();
    assert!(matches!(err, CheckpointError::UnsupportedVersion { found } if found == CHECKPOINT_VERSION + 1));
}

#[test]
fn test_truncated_file_is_json_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("agent.json");
    PpoAgent::new(config()).save_checkpoint(&path).unwrap();
    let bytes = fs::read(&path).unwrap();
    fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

    assert!(matches!(Checkpoint::load(&path), Err(CheckpointError::Json(_))));
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = PpoAgent::load(config(), &dir.path().join("absent.json")).err().unwrap();
    assert!(matches!(err, CheckpointError::Io(_)));
}

#[test]
fn test_configured_learning_rate_wins() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("agent.json");
    trained_agent().save_checkpoint(&path).unwrap();

    let tuned = PpoConfig {
        learning_rate: 0.05,
        ..config()
    };
    let agent = PpoAgent::load(tuned, &path).unwrap();
    assert_eq!(agent.config().learning_rate, 0.05);
    assert_eq!(agent.checkpoint().optimizer.learning_rate, 0.05);
}
