//! meshgen - procedural mesh graph compiler
//!
//! Compiles a project's graph into a JSON report, converts single mesh
//! sections and checks projects for missing references.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use meshgen::convert::{MeshConversionFlags, MorphSelection};
use meshgen::report::MeshSummary;
use meshgen::{
    CompilationContext, CompileReport, CompilerOptions, MeshSource, Project, compile_graph,
    convert_skeletal_mesh, convert_static_mesh, load_options,
};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "meshgen")]
#[command(about = "Procedural mesh graph compiler")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile every object of a project
    Compile {
        /// Path to the project JSON
        project: PathBuf,

        /// Compiler options (meshgen.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Write the JSON report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Only report this LOD
        #[arg(short, long)]
        lod: Option<u32>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Convert one section of a mesh asset
    Convert {
        /// Path to the project JSON
        project: PathBuf,

        /// Mesh asset name
        #[arg(short, long)]
        mesh: String,

        #[arg(short, long, default_value_t = 0)]
        lod: u32,

        #[arg(short, long, default_value_t = 0)]
        section: u32,

        /// Compiler options (meshgen.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Component whose skeleton and bone removal apply
        #[arg(long)]
        component: Option<String>,

        /// Bake this morph target into the vertices
        #[arg(long)]
        morph: Option<String>,

        #[arg(long)]
        ignore_skinning: bool,

        #[arg(long)]
        ignore_physics: bool,

        #[arg(long)]
        ignore_morphs: bool,
    },

    /// Report references to missing assets, tables, images and macros
    Check {
        /// Path to the project JSON
        project: PathBuf,
    },
}

fn options(config: Option<&Path>) -> Result<CompilerOptions> {
    match config {
        Some(path) => load_options(path),
        None => Ok(CompilerOptions::default()),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match &cli.command {
        Commands::Compile { verbose: true, .. } => tracing::Level::DEBUG,
        _ => tracing::Level::INFO,
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();

    match cli.command {
        Commands::Compile {
            project,
            config,
            output,
            lod,
            verbose: _,
        } => {
            tracing::info!("Compiling {:?}", project);
            let options = options(config.as_deref())?;
            let loaded = Project::load(&project)?;
            let services = loaded.services();
            let compiled = compile_graph(&loaded.graph, &loaded.assets, &services, &services, options);

            let report = CompileReport::new(&compiled, lod);
            let json = serde_json::to_string_pretty(&report)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("Failed to write report: {}", path.display()))?;
                    tracing::info!("Wrote {:?}", path);
                }
                None => println!("{json}"),
            }
        }

        Commands::Convert {
            project,
            mesh,
            lod,
            section,
            config,
            component,
            morph,
            ignore_skinning,
            ignore_physics,
            ignore_morphs,
        } => {
            let options = options(config.as_deref())?;
            let loaded = Project::load(&project)?;
            let assets = &loaded.assets;

            let converted = if let Some(asset) = assets.static_mesh(&mesh) {
                convert_static_mesh(asset, lod as usize, section as usize)?
            } else {
                let mut ctx = CompilationContext::new(options);
                for info in &assets.components {
                    ctx.register_component(info, assets)?;
                }
                let mut flags = MeshConversionFlags::empty();
                flags.set(MeshConversionFlags::IGNORE_SKINNING, ignore_skinning);
                flags.set(MeshConversionFlags::IGNORE_PHYSICS, ignore_physics);
                flags.set(MeshConversionFlags::IGNORE_MORPHS, ignore_morphs);

                let source = MeshSource {
                    flags,
                    component,
                    real_time_morphs: MorphSelection::All,
                    ..MeshSource::new(mesh.as_str(), lod, section)
                };
                tracing::info!("Converting {} LOD {} section {}", mesh, lod, section);
                convert_skeletal_mesh(&mut ctx, assets, &source, morph.as_deref())?
            };

            let summary = MeshSummary::of(&converted);
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Commands::Check { project } => {
            tracing::info!("Checking {:?}", project);
            let loaded = Project::load(&project)?;
            let problems = loaded.check_references();
            for problem in &problems {
                tracing::warn!("{}", problem);
            }
            if !problems.is_empty() {
                anyhow::bail!("{} missing references in {:?}", problems.len(), project);
            }
            tracing::info!("Project is valid!");
        }
    }

    Ok(())
}
