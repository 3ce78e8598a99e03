//! App resource commands: a representative consumer of the transport and
//! pagination driver.

use crate::api::Resource;
use crate::cli::AppsCommands;
use crate::error::Error;
use crate::pagination::{paginate_all, paginate_stream, Page};
use crate::render::{NdjsonWriter, Renderer};
use crate::transport::Client;

/// Execute an `apps` subcommand against an authenticated client.
///
/// # Errors
///
/// Surfaces transport and pagination errors.
pub async fn execute(
    client: &Client,
    command: AppsCommands,
    renderer: Renderer,
) -> Result<(), Error> {
    match command {
        AppsCommands::List {
            limit,
            paginate,
            stream,
            filter_name,
        } => list(client, limit, paginate, stream, filter_name, renderer).await,
        AppsCommands::Get { id } => get(client, &id, renderer).await,
    }
}

async fn list(
    client: &Client,
    limit: u32,
    paginate: bool,
    stream: bool,
    filter_name: Option<String>,
    renderer: Renderer,
) -> Result<(), Error> {
    let mut query = Vec::new();
    if let Some(name) = filter_name {
        query.push(("filter[name]".to_string(), name));
    }

    let first = client.list("/v1/apps", limit, &query).await?;

    if stream {
        let mut writer = NdjsonWriter::new(std::io::stdout().lock());
        return paginate_stream(
            first,
            |url| async move { client.list_url(&url).await },
            |page| {
                for resource in &page.data {
                    writer.emit(&app_row(resource))?;
                }
                Ok(())
            },
        )
        .await;
    }

    let apps: Vec<Resource> = if paginate {
        paginate_all(first, |url| async move { client.list_url(&url).await }).await?
    } else {
        first.into_items()
    };

    let rows: Vec<serde_json::Value> = apps.iter().map(app_row).collect();
    renderer.print(&serde_json::Value::Array(rows))
}

async fn get(client: &Client, id: &str, renderer: Renderer) -> Result<(), Error> {
    let document = client.document(&format!("/v1/apps/{id}")).await?;
    renderer.print(&app_row(&document.data))
}

/// Flatten one app resource into the fields operators actually read.
fn app_row(resource: &Resource) -> serde_json::Value {
    serde_json::json!({
        "id": resource.id,
        "name": resource.attribute_str("name"),
        "bundleId": resource.attribute_str("bundleId"),
        "sku": resource.attribute_str("sku"),
        "primaryLocale": resource.attribute_str("primaryLocale"),
    })
}
