//! Warden CLI - Command-line interface for the object permission store
//!
//! Grants, revokes and checks per-object permissions against the store and
//! catalog described by the configuration file.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use warden_core::{
    init_logging, log_operation_error, log_operation_start, CatalogModel, ObjectRef, Principal,
    StoreBackend, TargetType, WardenConfig,
};
use warden_grants::{Guardian, ObjectQuery};

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Grant and check permissions on individual objects")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Print results as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,

        /// Target types to give the default add/change/delete/view permissions
        #[arg(long = "model", value_name = "NAMESPACE.MODEL")]
        models: Vec<String>,
    },

    /// List catalog permissions
    Catalog {
        /// Only permissions of this target type
        #[arg(long, value_name = "NAMESPACE.MODEL")]
        target: Option<String>,
    },

    /// Grant a permission on one object
    Assign {
        /// Bare codename or namespace.codename
        permission: String,

        #[command(flatten)]
        object: ObjectArgs,

        #[command(flatten)]
        principals: PrincipalArgs,
    },

    /// Revoke a permission, on one object or on all of them
    Remove {
        /// Bare codename or namespace.codename
        permission: String,

        #[command(flatten)]
        principals: PrincipalArgs,

        /// Target type of the object; omit together with --object-id to revoke everywhere
        #[arg(long, value_name = "NAMESPACE.MODEL", requires = "object_id")]
        target: Option<String>,

        #[arg(long, requires = "target")]
        object_id: Option<String>,
    },

    /// Check whether a principal holds a permission on one object
    Check {
        permission: String,

        #[command(flatten)]
        object: ObjectArgs,

        #[command(flatten)]
        principal: SinglePrincipalArgs,
    },

    /// List objects of one type a principal holds permissions on
    Objects {
        /// One or more permission names
        #[arg(required = true)]
        permissions: Vec<String>,

        #[arg(long, value_name = "NAMESPACE.MODEL")]
        target: String,

        #[command(flatten)]
        principal: SinglePrincipalArgs,

        /// Match objects with any of the permissions instead of all
        #[arg(long)]
        any: bool,

        /// Ignore grants inherited through groups
        #[arg(long)]
        no_groups: bool,
    },

    /// List the permissions a principal holds on one object
    Perms {
        #[command(flatten)]
        object: ObjectArgs,

        #[command(flatten)]
        principal: SinglePrincipalArgs,
    },

    /// List every grant on one object
    Grants {
        #[command(flatten)]
        object: ObjectArgs,
    },
}

#[derive(Args)]
struct ObjectArgs {
    /// Target type of the object
    #[arg(value_name = "NAMESPACE.MODEL")]
    target: String,

    /// Primary key of the object
    object_id: String,
}

impl ObjectArgs {
    fn object_ref(&self) -> Result<ObjectRef> {
        let target_type: TargetType = self.target.parse()?;
        Ok(ObjectRef::new(target_type, self.object_id.as_str()))
    }
}

#[derive(Args)]
struct PrincipalArgs {
    /// User principals
    #[arg(long = "user", value_name = "USER_ID")]
    users: Vec<String>,

    /// Group principals
    #[arg(long = "group", value_name = "GROUP_ID")]
    groups: Vec<String>,
}

impl PrincipalArgs {
    fn principals(&self) -> Result<Vec<Principal>> {
        let principals: Vec<Principal> = self
            .users
            .iter()
            .map(|u| Principal::user(u.as_str()))
            .chain(self.groups.iter().map(|g| Principal::group(g.as_str())))
            .collect();
        if principals.is_empty() {
            bail!("At least one --user or --group is required");
        }
        Ok(principals)
    }
}

#[derive(Args)]
struct SinglePrincipalArgs {
    #[arg(long, value_name = "USER_ID", conflicts_with = "group", required_unless_present = "group")]
    user: Option<String>,

    #[arg(long, value_name = "GROUP_ID")]
    group: Option<String>,
}

impl SinglePrincipalArgs {
    fn principal(&self) -> Result<Principal> {
        match (&self.user, &self.group) {
            (Some(user), _) => Ok(Principal::user(user.as_str())),
            (None, Some(group)) => Ok(Principal::group(group.as_str())),
            (None, None) => bail!("Either --user or --group is required"),
        }
    }
}

#[derive(Serialize)]
struct GrantRow {
    principal: String,
    permission: String,
    object: String,
    created_at: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force, models } => {
            let path = cli.config.unwrap_or_else(WardenConfig::default_path);
            handle_init(&path, force, &models)
        }
        command => {
            let config = load_config(cli.config.as_ref())?;

            let mut logging_config = config.logging.clone();
            if cli.verbose {
                logging_config.level = "debug".to_string();
            }
            init_logging(&logging_config)
                .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

            info!("Starting Warden CLI v{}", env!("CARGO_PKG_VERSION"));

            let guardian = Guardian::from_config(&config)
                .await
                .context("Failed to open the grant store")?;
            run(&guardian, command, cli.json).await
        }
    }
}

async fn run(guardian: &Guardian, command: Commands, json: bool) -> Result<()> {
    match command {
        Commands::Init { .. } => bail!("init does not run against an open store"),
        Commands::Catalog { target } => handle_catalog(guardian, target, json).await,
        Commands::Assign {
            permission,
            object,
            principals,
        } => handle_assign(guardian, &permission, &object, &principals, json).await,
        Commands::Remove {
            permission,
            principals,
            target,
            object_id,
        } => handle_remove(guardian, &permission, &principals, target, object_id, json).await,
        Commands::Check {
            permission,
            object,
            principal,
        } => handle_check(guardian, &permission, &object, &principal, json).await,
        Commands::Objects {
            permissions,
            target,
            principal,
            any,
            no_groups,
        } => {
            let mut query = if any {
                ObjectQuery::any_of(&permissions)
            } else {
                ObjectQuery::all_of(&permissions)
            };
            if no_groups {
                query = query.without_groups();
            }
            handle_objects(guardian, &query, &target, &principal, json).await
        }
        Commands::Perms { object, principal } => {
            handle_perms(guardian, &object, &principal, json).await
        }
        Commands::Grants { object } => handle_grants(guardian, &object, json).await,
    }
}

fn load_config(config_path: Option<&PathBuf>) -> Result<WardenConfig> {
    if let Some(path) = config_path {
        info!("Loading configuration from {:?}", path);
        return Ok(WardenConfig::from_file(path)?);
    }

    // Try to load from default locations
    let default_paths = [
        dirs::config_dir().map(|d| d.join("warden").join("config.toml")),
        Some(WardenConfig::default_path()),
        Some(PathBuf::from("warden.toml")),
    ];

    for path in default_paths.iter().flatten() {
        if path.exists() {
            debug!("Loading configuration from {:?}", path);
            return Ok(WardenConfig::from_file(path)?);
        }
    }

    // Nothing persists between runs with the in-memory default
    eprintln!("No configuration file found, using an in-memory store");
    Ok(WardenConfig::default())
}

fn handle_init(path: &Path, force: bool, models: &[String]) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "Configuration already exists at {} (use --force to overwrite)",
            path.display()
        );
    }

    let mut config = WardenConfig::default();
    config.store.backend = StoreBackend::Sqlite;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        config.store.database_url = format!("sqlite://{}", dir.join("warden.db").display());
    }
    for model in models {
        model.parse::<TargetType>()?;
        config.catalog_models.push(CatalogModel {
            target: model.clone(),
        });
    }
    config.validate()?;
    config
        .save_to_file(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("✅ Configuration written to {}", path.display());
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

async fn handle_catalog(guardian: &Guardian, target: Option<String>, json: bool) -> Result<()> {
    let permissions = match target {
        Some(target) => {
            let target_type: TargetType = target.parse()?;
            guardian.catalog().for_type(&target_type).await
        }
        None => guardian.catalog().all().await,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&permissions)?);
        return Ok(());
    }

    if permissions.is_empty() {
        println!("The catalog is empty");
    }
    for permission in &permissions {
        println!(
            "{:<24} {:<28} {}",
            permission.target_type,
            permission.qualified_name(),
            permission.description
        );
    }
    Ok(())
}

async fn handle_assign(
    guardian: &Guardian,
    permission: &str,
    object: &ObjectArgs,
    principals: &PrincipalArgs,
    json: bool,
) -> Result<()> {
    let object = object.object_ref()?;
    let principals = principals.principals()?;
    log_operation_start!("cli_assign", permission = permission, object = %object);

    let grants = guardian
        .assign_many(permission, &principals, &object)
        .await
        .inspect_err(|e| {
            e.log();
            log_operation_error!("cli_assign", e, object = %object);
        })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&grants)?);
    } else {
        for grant in &grants {
            println!(
                "✅ {} now has {} on {}",
                grant.principal(),
                grant.permission().codename,
                grant.object()
            );
        }
    }
    Ok(())
}

async fn handle_remove(
    guardian: &Guardian,
    permission: &str,
    principals: &PrincipalArgs,
    target: Option<String>,
    object_id: Option<String>,
    json: bool,
) -> Result<()> {
    let principals = principals.principals()?;
    let object = match (target, object_id) {
        (Some(target), Some(object_id)) => {
            Some(ObjectRef::new(target.parse::<TargetType>()?, object_id))
        }
        _ => None,
    };

    let removed = guardian
        .remove_many(
            permission,
            &principals,
            object.as_ref().map(|o| o as &(dyn warden_core::Target + Sync)),
        )
        .await
        .inspect_err(|e| e.log())?;

    if json {
        println!("{}", serde_json::json!({ "removed": removed }));
    } else {
        match &object {
            Some(object) => println!("Removed {} grants of {} on {}", removed, permission, object),
            None => println!("Removed {} grants of {} on all objects", removed, permission),
        }
    }
    Ok(())
}

async fn handle_check(
    guardian: &Guardian,
    permission: &str,
    object: &ObjectArgs,
    principal: &SinglePrincipalArgs,
    json: bool,
) -> Result<()> {
    let object = object.object_ref()?;
    let principal = principal.principal()?;
    let granted = guardian
        .has_permission(&principal, permission, &object)
        .await?;

    if json {
        println!("{}", serde_json::json!({ "granted": granted }));
    } else if granted {
        println!("✅ {} has {} on {}", principal, permission, object);
    } else {
        println!("❌ {} does not have {} on {}", principal, permission, object);
    }

    if !granted {
        std::process::exit(1);
    }
    Ok(())
}

async fn handle_objects(
    guardian: &Guardian,
    query: &ObjectQuery,
    target: &str,
    principal: &SinglePrincipalArgs,
    json: bool,
) -> Result<()> {
    let target_type: TargetType = target.parse()?;
    let principal = principal.principal()?;

    let mut objects: Vec<ObjectRef> = guardian
        .objects_for(&principal, query, &target_type)
        .await?
        .into_iter()
        .collect();
    objects.sort();

    if json {
        let ids: Vec<&str> = objects.iter().map(|o| o.object_id.as_str()).collect();
        println!("{}", serde_json::to_string_pretty(&ids)?);
    } else {
        for object in &objects {
            println!("{}", object);
        }
        println!("{} objects", objects.len());
    }
    Ok(())
}

async fn handle_perms(
    guardian: &Guardian,
    object: &ObjectArgs,
    principal: &SinglePrincipalArgs,
    json: bool,
) -> Result<()> {
    let object = object.object_ref()?;
    let principal = principal.principal()?;

    let mut codenames: Vec<String> = guardian
        .permissions_for(&principal, &object)
        .await?
        .into_iter()
        .collect();
    codenames.sort();

    if json {
        println!("{}", serde_json::to_string_pretty(&codenames)?);
    } else if codenames.is_empty() {
        println!("{} holds no permissions on {}", principal, object);
    } else {
        println!("{}", codenames.join("\n"));
    }
    Ok(())
}

async fn handle_grants(guardian: &Guardian, object: &ObjectArgs, json: bool) -> Result<()> {
    let object = object.object_ref()?;
    let grants = guardian.grants_on(&object).await?;

    let rows: Vec<GrantRow> = grants
        .users
        .iter()
        .map(|g| GrantRow {
            principal: format!("user:{}", g.principal),
            permission: g.permission.codename.clone(),
            object: g.object.to_string(),
            created_at: g.created_at.to_rfc3339(),
        })
        .chain(grants.groups.iter().map(|g| GrantRow {
            principal: format!("group:{}", g.principal),
            permission: g.permission.codename.clone(),
            object: g.object.to_string(),
            created_at: g.created_at.to_rfc3339(),
        }))
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No grants on {}", object);
    }
    for row in &rows {
        println!("{:<24} {:<28} {}", row.principal, row.permission, row.created_at);
    }
    Ok(())
}
