use crate::OrchestratorError;
use crate::anomalies::AnomalyRepository;
use crate::events::EventRepository;
use crate::fixes::FixRepository;
use crate::repos::RepoRepository;

pub trait Store {
    type Anomalies<'a>: AnomalyRepository
    where
        Self: 'a;
    type Fixes<'a>: FixRepository
    where
        Self: 'a;
    type Repos<'a>: RepoRepository
    where
        Self: 'a;
    type Events<'a>: EventRepository
    where
        Self: 'a;

    fn anomalies(&self) -> Self::Anomalies<'_>;
    fn fixes(&self) -> Self::Fixes<'_>;
    fn repos(&self) -> Self::Repos<'_>;
    fn events(&self) -> Self::Events<'_>;

    fn with_tx<F, T>(&self, f: F) -> Result<T, OrchestratorError>
    where
        F: FnOnce(&Self) -> Result<T, OrchestratorError>;
}
