//! Shader loading, compilation and linking.
//!
//! WGSL sources are parsed and validated with naga on the CPU before the
//! device ever sees them, so a broken shader is reported as a [`ShaderError`]
//! instead of a device validation panic. "Linking" checks that the two stages
//! agree with each other and with what the renderer binds.

use std::path::Path;

use anyhow::Context;

use crate::{config::ShaderConfig, resources};

/// Uniform slot the renderer provides to both stages.
pub const FRAME_UNIFORM_BINDING: (u32, u32) = (0, 0);

/// Size in bytes of the buffer bound at [`FRAME_UNIFORM_BINDING`].
pub const FRAME_UNIFORM_SIZE: u32 = 16;

/// Location of the only vertex attribute the mesh provides.
pub const POSITION_LOCATION: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Vertex,
    Fragment,
}

impl StageKind {
    fn naga_stage(self) -> naga::ShaderStage {
        match self {
            StageKind::Vertex => naga::ShaderStage::Vertex,
            StageKind::Fragment => naga::ShaderStage::Fragment,
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageKind::Vertex => write!(f, "vertex"),
            StageKind::Fragment => write!(f, "fragment"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShaderError {
    Compile {
        stage: StageKind,
        label: String,
        log: String,
    },
    MissingEntryPoint {
        stage: StageKind,
        label: String,
        entry: String,
    },
    Link(String),
}

impl std::fmt::Display for ShaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShaderError::Compile { stage, label, log } => {
                write!(f, "{} shader {} failed to compile:\n{}", stage, label, log)
            }
            ShaderError::MissingEntryPoint {
                stage,
                label,
                entry,
            } => write!(
                f,
                "{} shader {} has no {} entry point named '{}'",
                stage, label, stage, entry
            ),
            ShaderError::Link(msg) => write!(f, "shader program failed to link: {}", msg),
        }
    }
}

impl std::error::Error for ShaderError {}

/// A user-defined stage input or output.
#[derive(Debug, Clone, PartialEq)]
pub struct Varying {
    pub location: u32,
    pub ty: naga::TypeInner,
}

/// A global variable bound to a `@group`/`@binding` slot.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceUse {
    pub group: u32,
    pub binding: u32,
    pub space: naga::AddressSpace,
    pub size: u32,
}

impl ResourceUse {
    fn slot(&self) -> (u32, u32) {
        (self.group, self.binding)
    }
}

/// A validated single-stage shader plus the interface reflected from its
/// entry point.
#[derive(Debug)]
pub struct CompiledStage {
    pub kind: StageKind,
    pub label: String,
    pub entry: String,
    source: String,
    inputs: Vec<Varying>,
    outputs: Vec<Varying>,
    bindings: Vec<ResourceUse>,
}

impl CompiledStage {
    pub fn compile(
        kind: StageKind,
        label: &str,
        source: String,
        entry: &str,
    ) -> Result<Self, ShaderError> {
        let compile_error = |log: String| ShaderError::Compile {
            stage: kind,
            label: label.to_string(),
            log,
        };

        let module = naga::front::wgsl::parse_str(&source)
            .map_err(|e| compile_error(e.emit_to_string(&source)))?;

        naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::empty(),
        )
        .validate(&module)
        .map_err(|e| compile_error(e.emit_to_string(&source)))?;

        let entry_point = module
            .entry_points
            .iter()
            .find(|ep| ep.name == entry && ep.stage == kind.naga_stage())
            .ok_or_else(|| ShaderError::MissingEntryPoint {
                stage: kind,
                label: label.to_string(),
                entry: entry.to_string(),
            })?;

        let mut inputs = Vec::new();
        for arg in &entry_point.function.arguments {
            collect_varyings(&module, arg.ty, arg.binding.as_ref(), &mut inputs);
        }

        let mut outputs = Vec::new();
        if let Some(result) = &entry_point.function.result {
            collect_varyings(&module, result.ty, result.binding.as_ref(), &mut outputs);
        }

        let mut layouter = naga::proc::Layouter::default();
        layouter
            .update(module.to_ctx())
            .map_err(|e| compile_error(format!("{:?}", e)))?;

        let bindings = module
            .global_variables
            .iter()
            .filter_map(|(_, var)| {
                var.binding.as_ref().map(|rb| ResourceUse {
                    group: rb.group,
                    binding: rb.binding,
                    space: var.space,
                    size: layouter[var.ty].size,
                })
            })
            .collect();

        Ok(Self {
            kind,
            label: label.to_string(),
            entry: entry.to_string(),
            source,
            inputs,
            outputs,
            bindings,
        })
    }

    pub fn inputs(&self) -> &[Varying] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Varying] {
        &self.outputs
    }

    pub fn bindings(&self) -> &[ResourceUse] {
        &self.bindings
    }

    fn input(&self, location: u32) -> Option<&Varying> {
        self.inputs.iter().find(|v| v.location == location)
    }

    fn output(&self, location: u32) -> Option<&Varying> {
        self.outputs.iter().find(|v| v.location == location)
    }

    fn create_module(&self, device: &wgpu::Device) -> wgpu::ShaderModule {
        device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(self.label.as_str()),
            source: wgpu::ShaderSource::Wgsl(self.source.as_str().into()),
        })
    }
}

// user-defined IO is either a located argument/result or a struct of them
fn collect_varyings(
    module: &naga::Module,
    ty: naga::Handle<naga::Type>,
    binding: Option<&naga::Binding>,
    out: &mut Vec<Varying>,
) {
    match binding {
        Some(naga::Binding::Location { location, .. }) => out.push(Varying {
            location: *location,
            ty: module.types[ty].inner.clone(),
        }),
        Some(naga::Binding::BuiltIn(_)) => {}
        None => {
            if let naga::TypeInner::Struct { members, .. } = &module.types[ty].inner {
                for member in members {
                    if let Some(naga::Binding::Location { location, .. }) = &member.binding {
                        out.push(Varying {
                            location: *location,
                            ty: module.types[member.ty].inner.clone(),
                        });
                    }
                }
            }
        }
    }
}

fn is_float(ty: &naga::TypeInner) -> bool {
    ty.scalar_kind() == Some(naga::ScalarKind::Float)
}

/// A linked vertex + fragment pair ready to be turned into device modules.
#[derive(Debug)]
pub struct ShaderProgram {
    pub vertex: CompiledStage,
    pub fragment: CompiledStage,
}

impl ShaderProgram {
    /// Reads, compiles and links the two shader files named in the config.
    pub fn load(config: &ShaderConfig) -> anyhow::Result<Self> {
        let vertex = compile_file(StageKind::Vertex, &config.vertex, &config.vertex_entry)?;
        let fragment =
            compile_file(StageKind::Fragment, &config.fragment, &config.fragment_entry)?;

        Ok(Self::link(vertex, fragment)?)
    }

    pub fn link(vertex: CompiledStage, fragment: CompiledStage) -> Result<Self, ShaderError> {
        if let Some(input) = vertex
            .inputs
            .iter()
            .find(|v| v.location != POSITION_LOCATION)
        {
            return Err(ShaderError::Link(format!(
                "vertex input at location {} is not provided by the mesh",
                input.location
            )));
        }

        match vertex.input(POSITION_LOCATION) {
            // the mesh feeds Float32x3
            Some(position) if !is_float(&position.ty) => {
                return Err(ShaderError::Link(format!(
                    "vertex input at location {} must be a float vector, found {:?}",
                    POSITION_LOCATION, position.ty
                )));
            }
            Some(_) => {}
            None => log::warn!(
                "{} does not read the vertex position at location {}",
                vertex.label,
                POSITION_LOCATION
            ),
        }

        for input in &fragment.inputs {
            match vertex.output(input.location) {
                None => {
                    return Err(ShaderError::Link(format!(
                        "fragment input at location {} is not written by the vertex stage",
                        input.location
                    )));
                }
                Some(output) if output.ty != input.ty => {
                    return Err(ShaderError::Link(format!(
                        "location {} type mismatch: vertex stage writes {:?}, fragment stage reads {:?}",
                        input.location, output.ty, input.ty
                    )));
                }
                Some(_) => {}
            }
        }

        match fragment.output(0) {
            None => {
                return Err(ShaderError::Link(
                    "fragment stage writes no colour at location 0".to_string(),
                ));
            }
            Some(color) if !is_float(&color.ty) => {
                return Err(ShaderError::Link(format!(
                    "colour output at location 0 must be a float vector, found {:?}",
                    color.ty
                )));
            }
            Some(_) => {}
        }

        for stage in [&vertex, &fragment] {
            for resource in &stage.bindings {
                let (group, binding) = resource.slot();
                if resource.slot() != FRAME_UNIFORM_BINDING {
                    return Err(ShaderError::Link(format!(
                        "{} shader binds @group({}) @binding({}), only the frame uniform at @group(0) @binding(0) exists",
                        stage.kind, group, binding
                    )));
                }
                if resource.space != naga::AddressSpace::Uniform {
                    return Err(ShaderError::Link(format!(
                        "{} shader declares @group({}) @binding({}) in {:?} space, the frame data is a uniform buffer",
                        stage.kind, group, binding, resource.space
                    )));
                }
                if resource.size > FRAME_UNIFORM_SIZE {
                    return Err(ShaderError::Link(format!(
                        "{} shader reads {} bytes at @group({}) @binding({}), the frame uniform holds {}",
                        stage.kind, resource.size, group, binding, FRAME_UNIFORM_SIZE
                    )));
                }
            }
        }

        Ok(Self { vertex, fragment })
    }

    /// Returns `(vertex, fragment)` device modules.
    pub fn create_modules(&self, device: &wgpu::Device) -> (wgpu::ShaderModule, wgpu::ShaderModule) {
        (
            self.vertex.create_module(device),
            self.fragment.create_module(device),
        )
    }
}

fn compile_file(kind: StageKind, path: &Path, entry: &str) -> anyhow::Result<CompiledStage> {
    let source = resources::load_text(path)
        .with_context(|| format!("unable to load {} shader", kind))?;
    let label = path.display().to_string();
    Ok(CompiledStage::compile(kind, &label, source, entry)?)
}
