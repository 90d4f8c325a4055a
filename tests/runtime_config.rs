//! Forward calls that take their mode and split policy from the global config.
//! Kept to one test so nothing else in this binary races on the config.

use qmodule::{get_config, Add, ConfigBuilder, InplacePolicy, Module, QuantType, RuntimeConfig, RuntimeMode, TensorBase};

fn tensors() -> Vec<TensorBase> {
    let a: Vec<i8> = (0..32).map(|i| i as i8 - 16).collect();
    let b: Vec<i8> = vec![1, -2, 3, -4];
    vec![
        TensorBase::from_vec(&[1, 4, 8], -2, a).unwrap(),
        TensorBase::from_vec(&[1, 4, 1], -2, b).unwrap(),
        TensorBase::zeros(&[1, 4, 8], -2, QuantType::Symm8Bit).unwrap(),
    ]
}

/// Run Add under `config` through `forward_default`, returning the output and task count.
fn run_default(config: ConfigBuilder) -> (Vec<i8>, usize) {
    config.apply().unwrap();
    let mut tensors = tensors();
    let mut add = Add::new(None, InplacePolicy::NonInplace, QuantType::Symm8Bit);
    add.bind(&[0, 1], &[2]);
    add.forward_default(&mut tensors).unwrap();
    (tensors[2].as_slice::<i8>().unwrap().to_vec(), add.task_count())
}

#[test]
fn test_forward_default_follows_global_config() {
    let (reference, tasks) = run_default(ConfigBuilder::new().default_mode(RuntimeMode::SingleCore));
    assert_eq!(tasks, 1);

    let (out, tasks) = run_default(ConfigBuilder::new().default_mode(RuntimeMode::MultiCore));
    assert_eq!(tasks, 2);
    assert_eq!(out, reference);

    // 32 elements: split at a threshold of 32, not at 33
    let (out, tasks) = run_default(ConfigBuilder::new().default_mode(RuntimeMode::Auto).split_threshold(32));
    assert_eq!(tasks, 2);
    assert_eq!(out, reference);
    let (_, tasks) = run_default(ConfigBuilder::new().default_mode(RuntimeMode::Auto).split_threshold(33));
    assert_eq!(tasks, 1);

    let (out, tasks) = run_default(
        ConfigBuilder::new()
            .default_mode(RuntimeMode::MultiCore)
            .split_threshold(2)
            .dual_core(false),
    );
    assert_eq!(tasks, 1);
    assert_eq!(out, reference);

    ConfigBuilder::new().apply().unwrap();
    assert_eq!(get_config(), RuntimeConfig::default());
}
