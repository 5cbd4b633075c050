use fleet_core::import::{encode_share_locator, ImportOffer};

use crate::commands::common::{confirm, Workspace};
use crate::error::CliError;

pub async fn run_share(workspace: &Workspace, base_url: Option<String>) -> Result<(), CliError> {
    let base_url = base_url.unwrap_or_else(|| workspace.profile.share_base_url());
    let snapshot = workspace.open_store().await?.load_snapshot().await;
    println!("{}", encode_share_locator(&base_url, &snapshot)?);
    Ok(())
}

pub async fn run_import(
    workspace: &Workspace,
    locator: &str,
    assume_yes: bool,
) -> Result<(), CliError> {
    let offer = ImportOffer::from_locator(locator)?.ok_or(CliError::NoImportPayload)?;

    println!("This link carries:");
    for line in describe_offer(&offer) {
        println!("  {line}");
    }
    if !assume_yes && !confirm("Replace all local data with it?")? {
        return Err(CliError::ImportDeclined);
    }

    offer.seed_store(&workspace.open_store().await?).await?;

    println!("Imported. Local data was replaced; nothing was pushed.");
    Ok(())
}

pub fn describe_offer(offer: &ImportOffer) -> Vec<String> {
    offer
        .summary()
        .into_iter()
        .map(|(collection, count)| format!("{collection:<10} {count}"))
        .collect()
}
