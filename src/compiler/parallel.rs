use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;

use super::{
    AsyncPlanCompiler, CompilationContext, CompilationReport, CompiledElement, MappingCompiler,
    PlanCompiler,
};
use crate::error::{Result, ShrMapError};
use crate::types::ElementDef;
use crate::utils::content_hash;

/// Compiles elements on blocking worker tasks, caching plans by the hash of their inputs.
#[derive(Clone)]
pub struct ParallelPlanCompiler {
    compiler: Arc<MappingCompiler>,
    cache: Arc<papaya::HashMap<String, CompiledElement>>,
}

impl ParallelPlanCompiler {
    pub fn new(compiler: MappingCompiler) -> Self {
        Self::from_shared(Arc::new(compiler))
    }

    pub fn from_shared(compiler: Arc<MappingCompiler>) -> Self {
        Self {
            compiler,
            cache: Arc::new(papaya::HashMap::new()),
        }
    }

    pub fn compiler(&self) -> &MappingCompiler {
        &self.compiler
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn clear_cache(&self) {
        self.cache.pin().clear();
    }

    pub async fn compile_namespace(&self, namespace: &str) -> Result<CompilationReport> {
        let elements = self
            .compiler
            .graph()
            .all_elements_in(namespace)
            .cloned()
            .collect();
        self.compile_batch(elements).await
    }

    /// Element, profile, extension definition and config all feed the key.
    fn cache_key(compiler: &MappingCompiler, element: &ElementDef) -> Result<String> {
        let profiles = compiler.profiles();
        let element_json = serde_json::to_vec(element)?;
        let profile_json = serde_json::to_vec(&profiles.profile_for(&element.identifier))?;
        let extension_json = serde_json::to_vec(&profiles.extension_for(&element.identifier))?;
        let config_json = serde_json::to_vec(compiler.config())?;
        Ok(content_hash(&[
            &element_json,
            &profile_json,
            &extension_json,
            &config_json,
        ]))
    }

    fn compile_cached(
        compiler: &MappingCompiler,
        cache: &papaya::HashMap<String, CompiledElement>,
        element: &ElementDef,
        context: &mut CompilationContext,
    ) -> Result<CompiledElement> {
        if !compiler.config().performance.cache_plans {
            return compiler.compile_with_context(element, context);
        }

        let key = Self::cache_key(compiler, element)?;
        {
            let guard = cache.pin();
            if let Some(compiled) = guard.get(&key) {
                #[cfg(feature = "tracing")]
                tracing::debug!(element = %element.identifier, "plan cache hit");
                return Ok(compiled.clone());
            }
        }

        let compiled = compiler.compile_with_context(element, context)?;
        cache.pin().insert(key, compiled.clone());
        Ok(compiled)
    }

    /// Compiles one chunk on the calling thread; failures are recorded per element.
    fn compile_chunk(
        compiler: &MappingCompiler,
        cache: &papaya::HashMap<String, CompiledElement>,
        chunk: &[ElementDef],
    ) -> CompilationReport {
        let mut report = CompilationReport::new();
        let mut context = CompilationContext::new(compiler.config());
        for element in chunk {
            let outcome = Self::compile_cached(compiler, cache, element, &mut context);
            report.record(&element.identifier, outcome);
        }
        report
    }
}

#[async_trait::async_trait]
impl AsyncPlanCompiler for ParallelPlanCompiler {
    async fn compile_async(&self, element: ElementDef) -> Result<CompiledElement> {
        let compiler = self.compiler.clone();
        let cache = self.cache.clone();
        tokio::task::spawn_blocking(move || {
            let mut context = CompilationContext::new(compiler.config());
            Self::compile_cached(&compiler, &cache, &element, &mut context)
        })
        .await
        .map_err(|e| ShrMapError::Concurrency {
            message: format!("compilation task failed: {e}"),
        })?
    }

    async fn compile_batch(&self, elements: Vec<ElementDef>) -> Result<CompilationReport> {
        let start = Instant::now();
        let mut report = CompilationReport::new();
        if elements.is_empty() {
            return Ok(report);
        }

        let performance = &self.compiler.config().performance;
        let batch_size = performance.batch_size.max(1);
        let workers = performance.max_concurrent_compilations.max(1);

        let chunks: Vec<Vec<ElementDef>> = elements
            .chunks(batch_size)
            .map(<[ElementDef]>::to_vec)
            .collect();
        let total_chunks = chunks.len();
        let mut pending = chunks.into_iter();
        let mut finished = 0;

        loop {
            let wave: Vec<Vec<ElementDef>> = pending.by_ref().take(workers).collect();
            if wave.is_empty() {
                break;
            }

            let tasks = wave.into_iter().map(|chunk| {
                let compiler = self.compiler.clone();
                let cache = self.cache.clone();
                tokio::task::spawn_blocking(move || Self::compile_chunk(&compiler, &cache, &chunk))
            });

            for joined in join_all(tasks).await {
                let partial = joined.map_err(|e| ShrMapError::Concurrency {
                    message: format!("compilation task failed: {e}"),
                })?;
                report.compiled.extend(partial.compiled);
                report.failures.extend(partial.failures);
                finished += 1;
            }

            #[cfg(feature = "tracing")]
            tracing::info!(
                batches = finished,
                total = total_chunks,
                compiled = report.compiled.len(),
                "compiled plan batch wave"
            );
        }

        report.sort();
        report.duration = start.elapsed();
        Ok(report)
    }
}
