//! Tenant provisioner CLI

use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::info;

use tenant_provisioner::config::{ClusterArgs, DatabaseArgs, ProvisionerConfig};
use tenant_provisioner::descriptor::DeploymentDescriptor;
use tenant_provisioner::kube_utils::create_client;
use tenant_provisioner::observer::{ObserveTarget, ObserverChain};
use tenant_provisioner::provisioner::KubeDescriptorClient;
use tenant_provisioner::service::{TenantService, TenantUpdate};
use tenant_provisioner::store::{ListFilter, PgTenantStore, DEFAULT_LIST_LIMIT};
use tenant_provisioner::telemetry::{init_telemetry, LogFormat, TelemetryConfig};
use tenant_provisioner::tenant::{DomainStatus, Tenant, TenantKey, TenantKind, Version};

/// Provision organizations and restaurants as Flux HelmReleases
#[derive(Parser, Debug)]
#[command(name = "tenant-provisioner", version, about, long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(flatten)]
    cluster: ClusterArgs,

    #[command(flatten)]
    provisioner: ProvisionerConfig,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage organizations
    Organizations {
        #[command(flatten)]
        database: DatabaseArgs,

        #[command(subcommand)]
        command: OrganizationCommands,
    },

    /// Manage restaurants
    Restaurants {
        #[command(flatten)]
        database: DatabaseArgs,

        #[command(subcommand)]
        command: RestaurantCommands,
    },

    /// Observe one release and print its classified status
    Status(StatusArgs),

    /// Print the HelmRelease a tenant would get, without touching the cluster
    Render(RenderArgs),
}

#[derive(Subcommand, Debug)]
enum OrganizationCommands {
    /// List organizations, refreshing their status from the cluster
    List(ListArgs),

    /// Create an organization and provision it
    Create {
        /// Organization name; also its namespace
        name: String,

        /// Declared version (defaults to 1.0.0)
        #[arg(long)]
        version: Option<Version>,
    },

    /// Change an organization's version and roll it out
    SetVersion {
        /// Organization id
        id: i64,

        /// New version
        version: Version,
    },

    /// Soft-delete an organization
    Delete {
        /// Organization id
        id: i64,
    },
}

#[derive(Subcommand, Debug)]
enum RestaurantCommands {
    /// List restaurants, refreshing their status from the cluster
    List {
        /// Only restaurants of this organization
        #[arg(long)]
        organization_id: Option<i64>,

        #[command(flatten)]
        list: ListArgs,
    },

    /// Create a restaurant under an organization and provision it
    Create {
        /// Owning organization id
        #[arg(long)]
        organization_id: i64,

        /// Restaurant name
        name: String,

        /// Declared version (defaults to 0.0.1)
        #[arg(long)]
        version: Option<Version>,
    },

    /// Change a restaurant's version and roll it out
    SetVersion {
        /// Restaurant id
        id: i64,

        /// New version
        version: Version,
    },

    /// Soft-delete a restaurant
    Delete {
        /// Restaurant id
        id: i64,
    },
}

/// Listing options shared by both tenant kinds
#[derive(Args, Debug)]
struct ListArgs {
    /// Rows to skip
    #[arg(long, default_value_t = 0)]
    offset: i64,

    /// Page size (1-200)
    #[arg(long, default_value_t = DEFAULT_LIST_LIMIT)]
    limit: i64,

    /// Case-insensitive name substring
    #[arg(long)]
    name: Option<String>,

    /// Only these statuses (repeatable)
    #[arg(long = "status")]
    statuses: Vec<DomainStatus>,

    /// Include soft-deleted rows
    #[arg(long)]
    include_deleted: bool,

    /// Print JSON instead of a table
    #[arg(long)]
    json: bool,
}

impl ListArgs {
    fn filter(&self, organization_id: Option<i64>) -> ListFilter {
        ListFilter {
            offset: self.offset,
            limit: self.limit,
            organization_id,
            name_contains: self.name.clone(),
            status_in: self.statuses.clone(),
            include_deleted: self.include_deleted,
        }
    }
}

#[derive(Args, Debug)]
struct StatusArgs {
    /// HelmRelease name
    release: String,

    /// Namespace (defaults to the release name)
    #[arg(long)]
    namespace: Option<String>,
}

#[derive(Args, Debug)]
struct RenderArgs {
    /// Organization name
    #[arg(long)]
    organization: String,

    /// Render this restaurant instead of the organization
    #[arg(long)]
    restaurant: Option<String>,

    /// Version to render
    #[arg(long)]
    version: Option<Version>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_telemetry(TelemetryConfig {
        format: cli.log_format,
        filter: None,
    })?;

    match cli.command {
        Commands::Organizations { database, command } => {
            let service = tenant_service(&cli.cluster, cli.provisioner, &database).await?;
            run_organizations(&service, command).await
        }
        Commands::Restaurants { database, command } => {
            let service = tenant_service(&cli.cluster, cli.provisioner, &database).await?;
            run_restaurants(&service, command).await
        }
        Commands::Status(args) => run_status(&cli.cluster, &cli.provisioner, args).await,
        Commands::Render(args) => run_render(&cli.provisioner, args),
    }
}

async fn tenant_service(
    cluster: &ClusterArgs,
    config: ProvisionerConfig,
    database: &DatabaseArgs,
) -> anyhow::Result<TenantService> {
    let client = create_client(cluster.kubeconfig.as_deref())
        .await
        .context("failed to create kubernetes client")?;
    let store = PgTenantStore::connect(&database.database_url, database.database_max_connections)
        .await
        .context("failed to connect to the tenant database")?;

    let observers = ObserverChain::for_client(client.clone(), config.scope_workloads_to_release);
    Ok(TenantService::assemble(
        Arc::new(config),
        Arc::new(store),
        Arc::new(KubeDescriptorClient::new(client)),
        observers,
    ))
}

async fn run_organizations(
    service: &TenantService,
    command: OrganizationCommands,
) -> anyhow::Result<()> {
    match command {
        OrganizationCommands::List(args) => {
            list(service, TenantKind::Organization, &args, None).await
        }
        OrganizationCommands::Create { name, version } => {
            let org = service.create_organization(&name, version).await?;
            print_tenants(&[org]);
            Ok(())
        }
        OrganizationCommands::SetVersion { id, version } => {
            set_version(service, TenantKey::organization(id), version).await
        }
        OrganizationCommands::Delete { id } => {
            service.delete(TenantKey::organization(id)).await?;
            Ok(())
        }
    }
}

async fn run_restaurants(service: &TenantService, command: RestaurantCommands) -> anyhow::Result<()> {
    match command {
        RestaurantCommands::List {
            organization_id,
            list: args,
        } => list(service, TenantKind::Restaurant, &args, organization_id).await,
        RestaurantCommands::Create {
            organization_id,
            name,
            version,
        } => {
            let restaurant = service
                .create_restaurant(organization_id, &name, version)
                .await?;
            print_tenants(&[restaurant]);
            Ok(())
        }
        RestaurantCommands::SetVersion { id, version } => {
            set_version(service, TenantKey::restaurant(id), version).await
        }
        RestaurantCommands::Delete { id } => {
            service.delete(TenantKey::restaurant(id)).await?;
            Ok(())
        }
    }
}

async fn list(
    service: &TenantService,
    kind: TenantKind,
    args: &ListArgs,
    organization_id: Option<i64>,
) -> anyhow::Result<()> {
    let listing = service.list(kind, &args.filter(organization_id)).await?;
    info!(
        examined = listing.report.examined,
        changed = listing.report.changed,
        failed = listing.report.failed,
        "Listed {}s",
        kind
    );

    if args.json {
        println!("{}", serde_json::to_string_pretty(&listing.tenants)?);
    } else {
        print_tenants(&listing.tenants);
    }
    Ok(())
}

async fn set_version(service: &TenantService, key: TenantKey, version: Version) -> anyhow::Result<()> {
    let tenant = service
        .update(
            key,
            TenantUpdate {
                version: Some(version),
                ..Default::default()
            },
        )
        .await?;
    print_tenants(&[tenant]);
    Ok(())
}

async fn run_status(
    cluster: &ClusterArgs,
    config: &ProvisionerConfig,
    args: StatusArgs,
) -> anyhow::Result<()> {
    let client = create_client(cluster.kubeconfig.as_deref())
        .await
        .context("failed to create kubernetes client")?;
    let observers = ObserverChain::for_client(client, config.scope_workloads_to_release);

    let target = ObserveTarget {
        namespace: args.namespace.unwrap_or_else(|| args.release.clone()),
        release_name: args.release,
    };
    let observation = observers.observe(&target).await?;

    for condition in &observation.conditions {
        println!(
            "{:<14} {:<8} {:<28} {}",
            condition.type_,
            condition.status.as_str(),
            condition.reason,
            condition.message
        );
    }
    println!("status: {}", observation.classify());
    Ok(())
}

fn run_render(config: &ProvisionerConfig, args: RenderArgs) -> anyhow::Result<()> {
    let descriptor = match &args.restaurant {
        Some(restaurant) => DeploymentDescriptor::for_restaurant(
            &args.organization,
            restaurant,
            &args
                .version
                .unwrap_or_else(|| TenantKind::Restaurant.default_version()),
            config,
        ),
        None => DeploymentDescriptor::for_organization(
            &args.organization,
            &args
                .version
                .unwrap_or_else(|| TenantKind::Organization.default_version()),
            config,
        ),
    };
    print!("{}", descriptor.to_yaml()?);
    Ok(())
}

fn print_tenants(tenants: &[Tenant]) {
    println!(
        "{:<6} {:<24} {:<24} {:<10} {}",
        "ID", "NAME", "NAMESPACE", "VERSION", "STATUS"
    );
    for t in tenants {
        println!(
            "{:<6} {:<24} {:<24} {:<10} {}",
            t.id,
            t.name,
            t.namespace(),
            t.version.as_str(),
            t.status
        );
    }
}
