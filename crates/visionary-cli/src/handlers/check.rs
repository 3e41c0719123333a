//! `visionary check`

use super::{launch_driver, Context};
use crate::commands::CheckArgs;
use crate::error::{CliError, CliResult};
use tracing::warn;
use visionary::resolver::ElementResolver;
use visionary::schema::TestAssets;

/// Resolve every element of an assets document on a live page
pub async fn check(ctx: &mut Context, args: &CheckArgs) -> CliResult<()> {
    let assets = TestAssets::load(&args.assets)?;
    let mut browser = ctx.config.browser.clone();
    if args.headed {
        browser.headless = false;
    }

    ctx.reporter.start_spinner(&format!("opening {}", args.url));
    let mut driver = match launch_driver(&browser).await {
        Ok(driver) => driver,
        Err(e) => {
            ctx.reporter.finish();
            return Err(e);
        }
    };
    let navigated = driver.navigate(&args.url).await;
    ctx.reporter.finish();
    if let Err(e) = navigated {
        let _ = driver.close().await;
        return Err(e.into());
    }

    let mut updater = args.learn.then(|| ctx.open_updater());
    let resolver = ElementResolver::new(driver.as_ref(), ctx.config.resolver.clone());
    let mut unresolved = 0usize;

    for element in assets.elements() {
        match resolver.resolve(&element.selectors, &element.description()).await {
            Ok(found) => {
                let note = if found.ambiguous {
                    format!(" ({} matches, first used)", found.match_count)
                } else {
                    String::new()
                };
                ctx.reporter.success(&format!(
                    "{}: {} [candidate {}]{note}",
                    element.name,
                    found.selector,
                    found.position + 1
                ));
                if let Some(updater) = updater.as_mut() {
                    updater
                        .store_mut()
                        .record_success(&args.url, &element.name, &found.selector.key());
                }
            }
            Err(e) => {
                unresolved += 1;
                ctx.reporter.failure(&format!("{}: {e}", element.name));
                if let (Some(updater), Some(first)) = (updater.as_mut(), element.selectors.first()) {
                    updater
                        .store_mut()
                        .record_failure(&args.url, &element.name, &first.key());
                }
            }
        }
    }
    drop(resolver);

    if let Some(mut updater) = updater {
        updater.persist();
    }
    if let Err(e) = driver.close().await {
        warn!(error = %e, "browser did not close cleanly");
    }

    if unresolved == 0 {
        Ok(())
    } else {
        Err(CliError::Unresolved {
            count: unresolved,
            url: args.url.clone(),
        })
    }
}
