use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::OnceCell;

use super::AssemblySymbol;

type AssemblyFuture = Pin<Box<dyn Future<Output = Arc<dyn AssemblySymbol>> + Send>>;
type AssemblyFactory = Box<dyn Fn() -> AssemblyFuture + Send + Sync>;

/// An assembly symbol that is only materialized on first use.
///
/// Queries hold one of these instead of a live assembly so that a lookup
/// with no name match never forces the assembly to be created.
pub struct LazyAssembly {
    cell: OnceCell<Arc<dyn AssemblySymbol>>,
    factory: AssemblyFactory,
}

impl LazyAssembly {
    pub fn new<F, Fut>(factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Arc<dyn AssemblySymbol>> + Send + 'static,
    {
        Self {
            cell: OnceCell::new(),
            factory: Box::new(move || Box::pin(factory())),
        }
    }

    /// Wraps an assembly that already exists.
    pub fn ready(assembly: Arc<dyn AssemblySymbol>) -> Self {
        let fallback = assembly.clone();
        Self {
            cell: OnceCell::new_with(Some(assembly)),
            factory: Box::new(move || {
                let assembly = fallback.clone();
                Box::pin(async move { assembly })
            }),
        }
    }

    pub async fn get(&self) -> Arc<dyn AssemblySymbol> {
        self.cell.get_or_init(|| (self.factory)()).await.clone()
    }

    pub fn is_materialized(&self) -> bool {
        self.cell.initialized()
    }
}

impl fmt::Debug for LazyAssembly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyAssembly")
            .field("materialized", &self.is_materialized())
            .finish()
    }
}
