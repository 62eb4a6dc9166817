use crate::vector_store::{IndexSpec, Metric, StoreError, VectorStore};
use serde::Serialize;
use thiserror::Error;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    #[default]
    Absent,
    Created,
    Populated,
    Queried,
    Deleted,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("index cannot move from {from:?} to {to:?}")]
pub struct TransitionError {
    pub from: IndexState,
    pub to: IndexState,
}

impl IndexState {
    pub fn can_transition(self, to: IndexState) -> bool {
        use IndexState::*;
        matches!(
            (self, to),
            (Absent, Created)
                | (Created, Populated)
                | (Populated, Populated)
                | (Populated, Queried)
                | (Queried, Queried)
                | (Created | Populated | Queried, Deleted)
        )
    }

    pub fn advance(&mut self, to: IndexState) -> Result<(), TransitionError> {
        if !self.can_transition(to) {
            return Err(TransitionError { from: *self, to });
        }
        *self = to;
        Ok(())
    }
}

/// Proof that an index was created. Later stages hold it to order themselves
/// after creation; it carries no data they need beyond the name.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct IndexHandle {
    pub name: String,
    pub dimension: usize,
}

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("refusing to create index `{0}` with dimension 0")]
    ZeroDimension(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Default)]
pub struct IndexLifecycle {
    state: IndexState,
}

impl IndexLifecycle {
    pub fn state(&self) -> IndexState {
        self.state
    }

    pub fn is_live(&self) -> bool {
        matches!(
            self.state,
            IndexState::Created | IndexState::Populated | IndexState::Queried
        )
    }

    pub async fn create(
        &mut self,
        store: &dyn VectorStore,
        name: &str,
        dimension: usize,
        metric: Metric,
    ) -> Result<IndexHandle, IndexError> {
        if dimension == 0 {
            return Err(IndexError::ZeroDimension(name.to_string()));
        }
        if !self.state.can_transition(IndexState::Created) {
            return Err(TransitionError {
                from: self.state,
                to: IndexState::Created,
            }
            .into());
        }
        let spec = IndexSpec {
            name: name.to_string(),
            dimension,
            metric,
        };
        store.create_index(&spec).await?;
        self.state.advance(IndexState::Created)?;
        log::info!("Created index `{}` (dimension {})", name, dimension);
        Ok(IndexHandle {
            name: spec.name,
            dimension,
        })
    }

    pub fn mark(&mut self, to: IndexState) -> Result<(), TransitionError> {
        self.state.advance(to)
    }

    /// Deletes the index. The lifecycle is terminal afterwards even when the
    /// store call fails, so teardown is never attempted twice.
    pub async fn delete(&mut self, store: &dyn VectorStore, name: &str) -> Result<(), IndexError> {
        self.state.advance(IndexState::Deleted)?;
        store.delete_index(name).await?;
        log::info!("Deleted index `{}`", name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::LocalStore;

    #[test]
    fn walks_the_happy_path() {
        let mut state = IndexState::Absent;
        for next in [
            IndexState::Created,
            IndexState::Populated,
            IndexState::Queried,
            IndexState::Deleted,
        ] {
            state.advance(next).unwrap();
        }
        assert_eq!(state, IndexState::Deleted);
    }

    #[test]
    fn deleted_is_terminal() {
        let mut state = IndexState::Deleted;
        for next in [
            IndexState::Absent,
            IndexState::Created,
            IndexState::Populated,
            IndexState::Deleted,
        ] {
            assert!(state.advance(next).is_err());
        }
    }

    #[test]
    fn cannot_delete_what_was_never_created() {
        let mut state = IndexState::Absent;
        assert_eq!(
            state.advance(IndexState::Deleted),
            Err(TransitionError {
                from: IndexState::Absent,
                to: IndexState::Deleted
            })
        );
        assert_eq!(state, IndexState::Absent);
    }

    #[tokio::test]
    async fn create_then_delete_against_local_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::load(dir.path().join("v.json")).await.unwrap();
        let mut lifecycle = IndexLifecycle::default();

        let handle = lifecycle
            .create(&store, "movies", 4, Metric::Cosine)
            .await
            .unwrap();
        assert_eq!(handle.dimension, 4);
        assert!(lifecycle.is_live());

        lifecycle.delete(&store, "movies").await.unwrap();
        assert_eq!(lifecycle.state(), IndexState::Deleted);
        assert!(store.index_names().await.is_empty());
    }

    #[tokio::test]
    async fn zero_dimension_leaves_index_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::load(dir.path().join("v.json")).await.unwrap();
        let mut lifecycle = IndexLifecycle::default();
        let err = lifecycle
            .create(&store, "movies", 0, Metric::Cosine)
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::ZeroDimension(_)));
        assert_eq!(lifecycle.state(), IndexState::Absent);
    }
}
