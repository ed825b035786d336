//! Configuration Integration Tests
//!
//! Loading tier configuration from TOML and the environment and feeding it
//! into a runtime.

mod common;

use std::sync::Arc;

use common::{init_tracing, runtime, CountingBackend};
use tiermem_core::prelude::*;

#[test]
fn test_toml_drives_runtime() -> TierResult<()> {
    init_tracing();
    let config = TierConfig::from_toml_str(
        r#"
        priority = ["exmem", "normal"]
        use_auto_arena_scaling = false
        expansion_zone_size_mb = 8
        normal_node = 0
        expansion_node = 0
        bind_failure = "ignore"
        oom_policy = "remain"
        "#,
    )?;
    assert_eq!(config.priority.preferred(), MemTier::Expansion);

    let backend = Arc::new(CountingBackend::default());
    let runtime = runtime(config, &backend, 3);
    assert_eq!(runtime.init()?, InitStatus::Initialized);

    let state = runtime.state()?;
    assert_eq!(state.pool(MemTier::Expansion).arena_ids().first(), Some(&ArenaId::new(0)));
    assert_eq!(state.pool(MemTier::Expansion).zone_size(), 8 << 20);
    assert_eq!(state.oom_policy(), OomPolicy::Remain);
    assert_eq!(
        state.manager().provider(MemTier::Normal).bind_failure(),
        BindFailurePolicy::Ignore
    );
    // knobs from the document are replaced by the scaled count
    assert_eq!(state.config().nr_expansion_arena, 3);
    assert_eq!(runtime.config().nr_expansion_arena, 1);
    Ok(())
}

#[test]
fn test_invalid_documents_are_rejected() {
    init_tracing();
    assert!(TierConfig::from_toml_str(r#"priority = ["normal"]"#).is_err());
    assert!(TierConfig::from_toml_str(r#"oom_policy = "panic""#).is_err());
    assert!(TierConfig::from_toml_str("nr_normal_arena = 129").is_err());
    assert!(TierConfig::from_toml_str("expansion_node = 4096").is_err());
}

#[test]
fn test_environment_overrides_defaults() -> TierResult<()> {
    init_tracing();
    std::env::set_var("TIERMEM_EXPANSION_ZONE_SIZE_MB", "32");
    std::env::set_var("TIERMEM_USE_AUTO_ARENA_SCALING", "false");

    let loaded = TierConfig::from_env();
    std::env::remove_var("TIERMEM_EXPANSION_ZONE_SIZE_MB");
    std::env::remove_var("TIERMEM_USE_AUTO_ARENA_SCALING");

    let config = loaded?;
    assert_eq!(config.expansion_zone_size_mb, 32);
    assert!(!config.use_auto_arena_scaling);
    assert_eq!(config.priority, TierPriority::default());
    Ok(())
}
