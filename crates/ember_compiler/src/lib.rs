use std::sync::Arc;

use ember_middle::ast::Program;
use ember_middle::compiler::CompiledUnit;

use self::config::CompilerConfig;
use self::descriptor::DescriptorCache;
use self::error::CompileError;
use self::install::{CodeInstaller, Verifier};
use self::verify::StackShapeVerifier;
use self::walker::CodeGenerator;

pub mod call_site;
pub mod config;
pub mod decompiler;
pub mod descriptor;
pub mod emitter;
pub mod error;
pub mod install;
pub mod lexical;
pub mod scope_access;
pub mod shared_call;
pub mod splitter;
pub mod unit;
pub mod verify;
pub mod weigh;
mod walker;

#[cfg(test)]
mod test;

pub type Result<T> = std::result::Result<T, CompileError>;

/// Lowers annotated programs into compiled units.
///
/// A compiler can be reused for any number of programs. Call site descriptors are interned in a cache
/// that can be shared with other compilers, also across threads.
pub struct Compiler {
    config: CompilerConfig,
    descriptors: Arc<DescriptorCache>,
}

impl Compiler {
    pub fn new(config: CompilerConfig) -> Self {
        Self::with_descriptors(config, Arc::new(DescriptorCache::new()))
    }

    pub fn with_descriptors(config: CompilerConfig, descriptors: Arc<DescriptorCache>) -> Self {
        Self { config, descriptors }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn descriptors(&self) -> &Arc<DescriptorCache> {
        &self.descriptors
    }

    /// Generates the units for `program` without verifying or installing them
    pub fn generate(&self, program: &Program) -> Result<Vec<CompiledUnit>> {
        let span = ember_log::span!(ember_log::Level::INFO, "generate", source = %program.source_name);
        let _enter = span.enter();

        let units = CodeGenerator::new(
            &self.config,
            &self.descriptors,
            &program.symbols,
            program.source_name.clone(),
        )
        .generate(&program.main)?;

        ember_log::info!(units = units.len(), "generated compile units");
        Ok(units)
    }

    /// Generates, verifies and installs `program`, returning the installer's handles in unit order
    pub fn compile<I: CodeInstaller>(&self, program: &Program, installer: &mut I) -> Result<Vec<I::Handle>> {
        self.compile_with(program, &StackShapeVerifier, installer)
    }

    /// Like [`Compiler::compile`], with a custom verifier.
    ///
    /// Nothing is installed unless every unit passes verification, and nothing stays installed if one of them
    /// fails to install.
    pub fn compile_with<V, I>(&self, program: &Program, verifier: &V, installer: &mut I) -> Result<Vec<I::Handle>>
    where
        V: Verifier + ?Sized,
        I: CodeInstaller,
    {
        let units = self.generate(program)?;

        for unit in &units {
            verifier.verify(unit).map_err(|source| {
                ember_log::error!(unit = %unit.name, error = %source, "unit failed verification");
                CompileError::Verification {
                    unit: unit.name.clone(),
                    source,
                }
            })?;
        }

        let mut handles = Vec::with_capacity(units.len());
        for unit in &units {
            ember_log::debug!(unit = %unit.name, "installing unit");
            match installer.install(&unit.name, unit) {
                Ok(handle) => handles.push(handle),
                Err(source) => {
                    ember_log::error!(unit = %unit.name, error = %source, discarded = handles.len(), "installation failed");
                    while let Some(handle) = handles.pop() {
                        installer.uninstall(handle);
                    }
                    return Err(CompileError::Install {
                        unit: unit.name.clone(),
                        source,
                    });
                }
            }
        }
        Ok(handles)
    }
}
