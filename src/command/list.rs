use anyhow::{Result, bail};
use tabled::{
    Table, Tabled,
    settings::{Padding, Style, object::Columns},
};

use crate::server::{EnvironmentEntry, NestRequest, NestResponse};

#[derive(Tabled)]
struct EnvironmentRow {
    #[tabled(rename = "USER")]
    user_id: String,
    #[tabled(rename = "INSTANCE")]
    name: String,
    #[tabled(rename = "IMAGE")]
    image: String,
}

impl From<EnvironmentEntry> for EnvironmentRow {
    fn from(entry: EnvironmentEntry) -> Self {
        Self {
            user_id: entry.user_id,
            name: entry.name,
            image: entry.image,
        }
    }
}

fn render(entries: Vec<EnvironmentEntry>) -> String {
    let rows: Vec<EnvironmentRow> = entries.into_iter().map(Into::into).collect();
    let mut table = Table::new(rows);
    table
        .with(Style::blank())
        .modify(Columns::new(0..3), Padding::new(0, 1, 0, 0));
    table.to_string()
}

pub fn run(addr: Option<&str>) -> Result<()> {
    let entries = match super::call(addr, &NestRequest::List)? {
        NestResponse::Environments { entries } => entries,
        NestResponse::Error { message } => bail!("{message}"),
        other => bail!("Unexpected response to list: {other:?}"),
    };

    if entries.is_empty() {
        println!("No live environments");
        return Ok(());
    }

    println!("{}", render(entries));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_table() {
        let out = render(vec![EnvironmentEntry {
            user_id: "u1".to_string(),
            name: "quirky_turing".to_string(),
            image: "rubyshadows/u1:3".to_string(),
        }]);
        assert!(out.contains("USER"));
        assert!(out.contains("quirky_turing"));
        assert!(out.contains("rubyshadows/u1:3"));
    }
}
