//! Migration Applier - runs loaded scripts against a pool
//!
//! Scripts run one administrative call each, strictly in batch order, with no
//! enclosing transaction. When a script fails, the ones before it stay
//! committed and the ones after it are never sent.

use super::loader::{self, MigrationBatch};
use super::source::MigrationSource;
use crate::backends::DatabasePool;
use crate::context::Context;
use crate::error::{DevroachError, DevroachResult};

/// Apply every script in `batch`, returning how many ran
pub async fn apply<P>(ctx: &Context, pool: &P, batch: &MigrationBatch) -> DevroachResult<usize>
where
    P: DatabasePool + ?Sized,
{
    if batch.is_empty() {
        return Ok(0);
    }

    tracing::debug!(target: "devroach", count = batch.len(), "applying migrations");

    for (index, script) in batch.iter().enumerate() {
        let ordinal = index + 1;
        tracing::debug!(target: "devroach", ordinal, path = %script.path, "applying migration");

        ctx.run(pool.execute_script(&script.sql))
            .await?
            .map_err(|source| DevroachError::Migration {
                ordinal,
                path: script.path.clone(),
                source,
            })?;
    }

    Ok(batch.len())
}

/// Load migrations from `source` and apply them to `pool`.
///
/// An absent source is a no-op.
pub async fn migrate<P>(ctx: &Context, pool: &P, source: Option<&MigrationSource>) -> DevroachResult<usize>
where
    P: DatabasePool + ?Sized,
{
    let Some(source) = source else {
        return Ok(0);
    };

    let batch = {
        let _entered = ctx.span().enter();
        loader::load(source)?
    };
    apply(ctx, pool, &batch).await
}
