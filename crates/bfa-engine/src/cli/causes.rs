// crates/bfa-engine/src/cli/causes.rs
// Cause and category commands

use super::CausesAction;
use anyhow::{Context, Result, bail};
use bfa::config::BfaConfig;
use bfa::knowledge_base::KnowledgeBase;
use bfa_types::{FailureCause, Indication};
use std::sync::Arc;

/// Build and start the configured backend
pub async fn open_knowledge_base(config: &BfaConfig) -> Result<Arc<dyn KnowledgeBase>> {
    let kb = config.knowledge_base.build();
    kb.start()
        .await
        .with_context(|| format!("opening {} knowledge base", kb.identity().kind.as_str()))?;
    Ok(kb)
}

pub async fn run_causes(config: &BfaConfig, action: CausesAction) -> Result<()> {
    let kb = open_knowledge_base(config).await?;
    let result = dispatch(kb.as_ref(), action).await;
    kb.stop().await?;
    result
}

async fn dispatch(kb: &dyn KnowledgeBase, action: CausesAction) -> Result<()> {
    match action {
        CausesAction::List { json } => {
            let causes = kb.get_causes().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&causes)?);
            } else if causes.is_empty() {
                println!("No failure causes");
            } else {
                for cause in &causes {
                    println!(
                        "{}  {}  [{}]  {} indication(s)",
                        cause.id_str(),
                        cause.name,
                        cause.categories.join(", "),
                        cause.indications.len()
                    );
                }
            }
        }
        CausesAction::Show { id } => match kb.get_cause(&id).await? {
            Some(cause) => println!("{}", serde_json::to_string_pretty(&cause)?),
            None => bail!("no failure cause with id {}", id),
        },
        CausesAction::Add {
            name,
            description,
            comment,
            categories,
            patterns,
            multiline,
            files,
        } => {
            let mut cause = FailureCause::new(name, description).with_comment(comment);
            for category in categories {
                cause = cause.with_category(category);
            }
            for pattern in patterns {
                cause = cause.with_indication(Indication::build_log(pattern));
            }
            for pattern in multiline {
                cause = cause.with_indication(Indication::multiline_build_log(pattern));
            }
            for arg in files {
                cause = cause.with_indication(parse_file_indication(&arg)?);
            }
            let added = kb.add_cause(cause).await?;
            println!("Added {} ({})", added.name, added.id_str());
        }
        CausesAction::Remove { id } => match kb.remove_cause(&id).await? {
            Some(removed) => println!("Removed {} ({})", removed.name, id),
            None => bail!("no failure cause with id {}", id),
        },
    }
    Ok(())
}

pub async fn run_categories(config: &BfaConfig) -> Result<()> {
    let kb = open_knowledge_base(config).await?;
    let categories = kb.get_categories().await;
    kb.stop().await?;
    for category in categories? {
        println!("{}", category);
    }
    Ok(())
}

/// `PATH=PATTERN`; the pattern may itself contain '='
fn parse_file_indication(arg: &str) -> Result<Indication> {
    match arg.split_once('=') {
        Some((path, pattern)) if !path.trim().is_empty() => Ok(Indication::file(path.trim(), pattern)),
        _ => bail!("file indication must be PATH=PATTERN, got '{}'", arg),
    }
}
