use anyhow::Result;
use clap::Args;
use pilot_core_types::TestCase;

use super::selection::TaskSelectionArgs;

#[derive(Args, Clone, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    pub selection: TaskSelectionArgs,
}

pub async fn cmd_list(args: ListArgs) -> Result<()> {
    let cases = args.selection.discover()?;
    if cases.is_empty() {
        println!("No test cases found matching filters");
        return Ok(());
    }
    for case in &cases {
        println!("{}", describe(case));
    }
    println!("\n{} test case(s)", cases.len());
    Ok(())
}

fn describe(case: &TestCase) -> String {
    let tags = if case.tags.is_empty() {
        "-".to_string()
    } else {
        case.tags.iter().cloned().collect::<Vec<_>>().join(",")
    };
    let skip = if case.skip { " [skip]" } else { "" };
    format!(
        "{}  priority={}  tags={}{}\n    {}",
        case.id, case.priority, tags, skip, case.objective
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_lists_priority_and_tags() {
        let case = TestCase::new("login", "Sign in as admin").with_tags(["smoke", "auth"]);
        assert_eq!(
            describe(&case),
            "login  priority=5  tags=auth,smoke\n    Sign in as admin"
        );
    }
}
