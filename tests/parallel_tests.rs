mod common;

use common::*;
use octofhir_shrmap::*;

fn parallel(config: CompilerConfig) -> ParallelPlanCompiler {
    ParallelPlanCompiler::new(MappingCompiler::with_config(
        create_test_graph(),
        create_test_profiles(),
        config,
    ))
}

fn sorted(mut report: CompilationReport) -> CompilationReport {
    report.sort();
    report
}

#[tokio::test]
async fn test_parallel_matches_sequential() {
    let config = CompilerConfig::default().with_batch_size(1).with_max_concurrency(2);
    let compiler = parallel(config);
    let elements: Vec<ElementDef> = compiler.compiler().graph().iter().cloned().collect();

    let concurrent = compiler.compile_batch(elements).await.unwrap();
    let sequential = sorted(compiler.compiler().compile_all());

    assert_eq!(concurrent.compiled, sequential.compiled);
    assert_eq!(concurrent.failures, sequential.failures);
    assert_eq!(compiler.cache_len(), concurrent.total());
}

#[tokio::test]
async fn test_compile_async_single_element() {
    let compiler = parallel(CompilerConfig::default());
    let element = compiler.compiler().graph().get(&blood_pressure_id()).unwrap().clone();

    let compiled = compiler.compile_async(element).await.unwrap();
    assert_eq!(compiled.identifier, blood_pressure_id());
    assert_eq!(compiled.plan(Direction::ToFhir).count("AssignConstructed"), 2);
    assert_eq!(compiler.cache_len(), 1);
}

#[tokio::test]
async fn test_failures_do_not_abort_batch() {
    let broken = ProfileTree::for_element(&id("shr.vital", "Diastolic"), "Observation");
    let mut profiles = create_test_profiles();
    profiles.push(broken).unwrap();

    let config = CompilerConfig::default().with_batch_size(2);
    let compiler = ParallelPlanCompiler::new(MappingCompiler::with_config(
        create_test_graph(),
        profiles,
        config,
    ));
    let report = compiler.compile_namespace("shr.vital").await.unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].identifier, id("shr.vital", "Diastolic"));
    assert_eq!(report.compiled.len(), 2);
    assert_eq!(compiler.cache_len(), 2);
}

#[tokio::test]
async fn test_cache_disabled() {
    let mut config = CompilerConfig::default();
    config.performance.cache_plans = false;
    let compiler = parallel(config);

    let report = compiler.compile_namespace("shr.entity").await.unwrap();
    assert_eq!(report.total(), 4);
    assert_eq!(compiler.cache_len(), 0);
}

#[tokio::test]
async fn test_shared_cache_across_clones() {
    let compiler = parallel(CompilerConfig::default());
    let clone = compiler.clone();

    compiler.compile_namespace("shr.vital").await.unwrap();
    let before = clone.cache_len();
    clone.compile_namespace("shr.vital").await.unwrap();

    assert_eq!(before, 3);
    assert_eq!(clone.cache_len(), 3);
    clone.clear_cache();
    assert_eq!(compiler.cache_len(), 0);
}
