use anyhow::Result;
use clap::Args;

use super::InputArgs;
use crate::summary::print_groups;

#[derive(Args)]
pub struct GroupsArgs {
    #[command(flatten)]
    pub input: InputArgs,
}

pub fn run(args: &GroupsArgs) -> Result<()> {
    let config = args.input.load_config()?;
    let catalog = args.input.build_catalog(&config);
    if catalog.is_empty() {
        println!("No frames.");
        return Ok(());
    }
    print_groups(&catalog);
    Ok(())
}
