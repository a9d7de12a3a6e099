//! Version numbering under concurrent writers

use std::collections::BTreeSet;
use std::sync::Arc;

use kyc_dsl::{
    AmendmentEngine, AmendmentLog, AmendmentStrategy, CasePipeline, InMemoryOntology, MemoryStore,
    OntologyRepository, VersionStore,
};
use kyc_dsl_core::Case;
use pretty_assertions::assert_eq;

const WRITERS: usize = 8;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_saves_never_skip_or_repeat() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());

    let mut handles = Vec::new();
    for case in ["ALPHA", "BETA"] {
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let text = format!("(kyc-case {}\n  (policy P{}))\n", case, i);
                store.save_case_version(case, &text).await.map(|v| (case, v.version))
            }));
        }
    }

    let mut seen: BTreeSet<(&str, i32)> = BTreeSet::new();
    for handle in handles {
        let (case, version) = handle.await??;
        assert!(seen.insert((case, version)), "duplicate version {} for {}", version, case);
    }

    for case in ["ALPHA", "BETA"] {
        let versions: Vec<i32> =
            store.list_versions(case).await?.iter().map(|v| v.version).collect();
        assert_eq!(versions, (1..=16).collect::<Vec<_>>());
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_amendments_lose_no_updates() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let ontology = InMemoryOntology::standard().load_snapshot().await?;
    let pipeline = CasePipeline::new(Arc::new(ontology));
    let initial = pipeline.process_one("(kyc-case RACE (kyc-token \"pending\"))")?;
    store.save_case_version("RACE", &initial.canonical_text).await?;

    let engine = Arc::new(
        AmendmentEngine::new(store.clone(), pipeline.clone()).with_max_retries(WRITERS as u32 * 4),
    );

    let handles: Vec<_> = (0..WRITERS)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let policy = format!("POL-{}", i);
                let strategy = AmendmentStrategy::local(move |case: &mut Case| {
                    case.add_policy(&policy);
                    Ok(())
                });
                engine.apply_amendment("RACE", "policy-discovery", strategy).await
            })
        })
        .collect();

    for handle in handles {
        handle.await??;
    }

    let versions: Vec<i32> = store.list_versions("RACE").await?.iter().map(|v| v.version).collect();
    assert_eq!(versions, (1..=WRITERS as i32 + 1).collect::<Vec<_>>());
    assert_eq!(store.get_amendments("RACE").await?.len(), WRITERS);

    // every writer's policy survived
    let latest = pipeline.load(&store.get_latest_dsl("RACE").await?)?;
    let policies: BTreeSet<String> = latest.policies.into_iter().collect();
    let expected: BTreeSet<String> = (0..WRITERS).map(|i| format!("POL-{}", i)).collect();
    assert_eq!(policies, expected);
    Ok(())
}
