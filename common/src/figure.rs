use core::fmt::Debug;
use std::path::Path;

use dyn_clone::{DynClone, clone_trait_object};
use eyre::Result;

use crate::{record::Record, variable::Registry};

/// One configured figure family. Implementations build their series from the
/// loaded records and write one or more images under `figure_dir`.
#[typetag::serde(tag = "type")]
pub trait Figure: Debug + DynClone + Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> String;

    /// Builds the figure's series and renders its image(s). `figure_dir`
    /// must already exist.
    fn render(&self, records: &[Record], registry: &Registry, figure_dir: &Path) -> Result<()>;
}
clone_trait_object!(Figure);
