use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use clap::Parser;
use serde_json::Value as Json;
use sparrow::{
    config::SparrowConfig,
    observability::init_tracing,
    scim::{
        Evaluator, FilterLimits, FullScan, Resource, ResourceType, ScimError, ScimResult, SchemaRegistry,
        parse_filter_with, resolve_path_with, split_attr_csv,
    },
};

#[derive(Parser, Debug)]
#[command(version, about = "SCIM filter and PATCH path toolkit", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Parse a filter and print its canonical form
    CheckFilter {
        filter: String,
        /// Also compile the filter against this resource type
        #[arg(short, long)]
        resource_type: Option<String>,
    },
    /// Evaluate a filter against a resource document
    Eval {
        /// JSON file holding the resource
        #[arg(short, long)]
        resource: PathBuf,
        filter: String,
    },
    /// Resolve a PATCH path against a resource type
    ResolvePath {
        #[arg(short = 't', long)]
        resource_type: String,
        path: String,
    },
    /// Print a resource in wire form, optionally projected
    Show {
        /// JSON file holding the resource
        #[arg(short, long)]
        resource: PathBuf,
        /// Comma-separated attributes to return
        #[arg(short, long, conflicts_with = "excluded_attributes")]
        attributes: Option<String>,
        /// Comma-separated attributes to leave out
        #[arg(short, long)]
        excluded_attributes: Option<String>,
        /// Drop read-only attributes first
        #[arg(long)]
        strip_read_only: bool,
    },
    /// Print the entries of a resource a PATCH path addresses
    Select {
        /// JSON file holding the resource
        #[arg(short, long)]
        resource: PathBuf,
        path: String,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match SparrowConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => SparrowConfig::default(),
    };

    if let Err(e) = init_tracing(&config.observability.logging) {
        eprintln!("Warning: {e}");
    }

    let registry = match config.load_registry() {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(args.command, &registry, &config.filter.limits()) {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::debug!(status = %err.status, detail = %err.detail, "Command failed");
            println!("{}", render(&serde_json::to_value(&err).unwrap_or(Json::Null)));
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command, registry: &SchemaRegistry, limits: &FilterLimits) -> ScimResult<String> {
    match command {
        Command::CheckFilter {
            filter,
            resource_type,
        } => {
            let node = parse_filter_with(&filter, limits)?;
            if let Some(name) = resource_type {
                Evaluator::compile(&node, resource_type_named(registry, &name)?)?;
            }
            Ok(node.to_string())
        }
        Command::Eval { resource, filter } => {
            let rs = load_resource(registry, &resource)?;
            let node = parse_filter_with(&filter, limits)?;
            let evaluator = Evaluator::compile_weighted(&node, rs.resource_type(), &FullScan)?;
            Ok(evaluator.evaluate(&rs).to_string())
        }
        Command::ResolvePath {
            resource_type,
            path,
        } => {
            let rt = resource_type_named(registry, &resource_type)?;
            let parsed = resolve_path_with(&path, rt, limits)?;
            Ok(render(&parsed.to_json()))
        }
        Command::Show {
            resource,
            attributes,
            excluded_attributes,
            strip_read_only,
        } => {
            let mut rs = load_resource(registry, &resource)?;
            if strip_read_only {
                rs.remove_read_only();
            }
            let json = match (&attributes, &excluded_attributes) {
                (Some(csv), _) => rs.to_json_projected(&split_attr_csv(csv), true),
                (None, Some(csv)) => rs.to_json_projected(&split_attr_csv(csv), false),
                (None, None) => rs.to_json(),
            };
            Ok(render(&json))
        }
        Command::Select { resource, path } => {
            let rs = load_resource(registry, &resource)?;
            let parsed = resolve_path_with(&path, rs.resource_type(), limits)?;
            let entries: Vec<Json> = parsed
                .container()
                .and_then(|at| rs.get_complex(at))
                .map(|ca| {
                    parsed
                        .select(&rs)
                        .into_iter()
                        .filter_map(|id| {
                            let entry = ca.entry_json(id)?;
                            Some(serde_json::json!({ "id": id.to_string(), "entry": entry }))
                        })
                        .collect()
                })
                .unwrap_or_default();
            Ok(render(&Json::Array(entries)))
        }
    }
}

fn resource_type_named<'a>(
    registry: &'a SchemaRegistry,
    name: &str,
) -> ScimResult<&'a Arc<ResourceType>> {
    registry
        .resource_type(name)
        .ok_or_else(|| ScimError::not_found(format!("Unknown resource type '{name}'")))
}

fn load_resource(registry: &SchemaRegistry, path: &Path) -> ScimResult<Resource> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        ScimError::bad_request(format!("Failed to read {}: {e}", path.display()))
    })?;
    let json: Json = serde_json::from_str(&text)
        .map_err(|e| ScimError::invalid_syntax(format!("Invalid JSON in {}: {e}", path.display())))?;
    Resource::from_json(registry, &json)
}

fn render(json: &Json) -> String {
    serde_json::to_string_pretty(json).unwrap_or_else(|_| json.to_string())
}
