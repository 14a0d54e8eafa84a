//! `statehive render`: Print the demo workspace.

use statehive_config::AppConfig;

use crate::demo;

pub fn run(config: &AppConfig, script_guide: bool) -> anyhow::Result<()> {
    let demo = demo::workspace(config)?;
    let text = if script_guide {
        demo.workspace.render_with_script_section()
    } else {
        demo.workspace.render()
    };
    println!("{text}");
    Ok(())
}
