//! Hooks into the execution environment that loads compiled units

use ember_middle::compiler::CompiledUnit;
use thiserror::Error;

use crate::verify::VerifyError;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct InstallError(pub String);

/// Materializes compiled units in the execution target.
///
/// The units of one program are installed in order. If one of them fails, the ones installed before it are
/// handed back to [`CodeInstaller::uninstall`] in reverse order.
pub trait CodeInstaller {
    type Handle;

    fn install(&mut self, name: &str, unit: &CompiledUnit) -> Result<Self::Handle, InstallError>;

    /// Discards a unit that was installed by this program
    fn uninstall(&mut self, handle: Self::Handle);
}

/// Checks a unit before it is installed
pub trait Verifier {
    fn verify(&self, unit: &CompiledUnit) -> Result<(), VerifyError>;
}

/// Collects installed units in memory
#[derive(Debug, Default)]
pub struct MemoryInstaller {
    pub units: Vec<CompiledUnit>,
}

impl CodeInstaller for MemoryInstaller {
    type Handle = usize;

    fn install(&mut self, _name: &str, unit: &CompiledUnit) -> Result<usize, InstallError> {
        self.units.push(unit.clone());
        Ok(self.units.len() - 1)
    }

    fn uninstall(&mut self, handle: usize) {
        if handle < self.units.len() {
            self.units.remove(handle);
        }
    }
}
