//! Change-request descriptions: a reviewer checklist assembled from blocks.

use crate::contract::FailureSignal;

/// Everything a description needs besides the checklist rules.
#[derive(Debug, Clone)]
pub struct BodyContext<'a> {
    pub name: &'a str,
    pub id: &'a str,
    pub document_type: &'a str,
    /// Link to the proposal in the contribution tool.
    pub inspect_url: &'a str,
    /// Same proposal on a locally running contribution tool.
    pub local_url: &'a str,
    pub tool_label: &'a str,
    pub tool_url: &'a str,
    pub has_selector: bool,
    /// History of extracted versions for this document.
    pub versions_url: &'a str,
    /// History of raw snapshots for this document.
    pub snapshots_url: &'a str,
}

fn scope_checklist(ctx: &BodyContext<'_>) -> Vec<String> {
    vec![
        "- [ ] The suggested document **matches the scope of this instance**: it targets a service in the language, jurisdiction, and industry described for this instance.".to_string(),
        format!(
            "- [ ] **The service name `{}` matches what you see on the web page**, and it complies with the [guidelines](https://docs.opentermsarchive.org/guidelines/declaring/#service-name).",
            ctx.name
        ),
        format!(
            "- [ ] **The service ID `{}` (i.e. the name of the file) is derived from the service name** according to the [guidelines](https://docs.opentermsarchive.org/guidelines/declaring/#service-id).",
            ctx.id
        ),
        format!(
            "- [ ] The terms type `{}` is appropriate for this document: reading out loud the [terms type tryptich](https://github.com/OpenTermsArchive/terms-types/blob/main/termsTypes.json), you can say that **\u{201c}this document describes how the `writer` commits to handle the `object` for its `audience`\u{201d}**.",
            ctx.document_type
        ),
    ]
}

fn selectors_checklist() -> Vec<String> {
    vec![
        "- [ ] **Selectors are:**".to_string(),
        "  - **stable**: as much as possible, the CSS selectors are meaningful and specific (e.g. `.tos-content` rather than `.ab23 .cK_drop > div`).".to_string(),
        "  - **simple**: the CSS selectors do not have unnecessary specificity (e.g. if there is an ID, do not add a class or a tag).".to_string(),
    ]
}

fn version_checklist() -> Vec<String> {
    vec![
        "- [ ] **Generated version** is:".to_string(),
        "  - **relevant**: it is not just a series of links, for example.".to_string(),
        "  - **readable**: it is complete and not mangled.".to_string(),
        "  - **clean**: it does not contain navigation links, unnecessary images, or extra content.".to_string(),
    ]
}

fn valid_until_checklist(ctx: &BodyContext<'_>) -> Vec<String> {
    vec![
        "- [ ] **`validUntil` date is correctly input** in the history file. To get the exact datetime of a commit, hover its date in the web interface or copy its `datetime` attribute.".to_string(),
        "  1. Find the date at which the problem was first encountered:".to_string(),
        "    - If there is one, find the first date at which an issue was opened claiming that the terms can not be tracked anymore.".to_string(),
        format!(
            "    - If there is no issue, or if the version is wrong even though the terms can be extracted, [find the first version]({}) with wrong data and obtain its date.",
            ctx.versions_url
        ),
        format!("    - If the document can not be fetched anymore, [find the latest snapshot]({}).", ctx.snapshots_url),
        format!(
            "  2. Find the most recent snapshot that is strictly anterior to this date from the [snapshots database]({}).",
            ctx.snapshots_url
        ),
        "  3. Set the creation date of this snapshot as the `validUntil` date in the history file.".to_string(),
    ]
}

fn add_checklist(ctx: &BodyContext<'_>) -> Vec<String> {
    let mut checklist = scope_checklist(ctx);
    if ctx.has_selector {
        checklist.extend(selectors_checklist());
    }
    checklist.extend(version_checklist());
    checklist
}

fn update_checklist(ctx: &BodyContext<'_>, failure: Option<&FailureSignal>) -> Vec<String> {
    let mut checklist = Vec::new();
    if ctx.has_selector {
        checklist.extend(selectors_checklist());
    }
    checklist.extend(version_checklist());
    if failure.is_none() {
        checklist.extend(valid_until_checklist(ctx));
    }
    checklist
}

fn footer(ctx: &BodyContext<'_>, kind: &str) -> String {
    format!(
        "_This {kind} has been created through the [{}]({}), which enables graphical declaration of documents. You can load it [on your local instance]({}) if you have one set up._\n",
        ctx.tool_label, ctx.tool_url, ctx.local_url
    )
}

const THANKS: &str = "Thanks to your work and attention, Open Terms Archive will ensure that high quality data is available for all reusers, enabling them to do their part in shifting the balance of power towards end users and regulators instead of spending time collecting and cleaning documents \u{1f4aa}";

/// Description of a change request adding a document type.
pub fn add_body(ctx: &BodyContext<'_>) -> String {
    format!(
        "### [\u{1f50e} Inspect this declaration suggestion]({})\n\n\
         Bots should take care of checking the formatting and the validity of the declaration. As a human reviewer, you should check:\n\n\
         {}\n\n\
         - - -\n\n\
         If no document type seems appropriate for this document yet it is relevant to track in this instance, please check if there is already an [open discussion](https://github.com/OpenTermsArchive/engine/discussions) about such a type and reference your case there, or open a new discussion if not.\n\n\
         {THANKS}\n\n\
         - - -\n\n\
         {}",
        ctx.inspect_url,
        add_checklist(ctx).join("\n"),
        footer(ctx, "suggestion")
    )
}

/// Description of a change request updating an existing document type.
pub fn update_body(ctx: &BodyContext<'_>, failure: Option<&FailureSignal>) -> String {
    let fixes = failure
        .and_then(|f| f.issue_number)
        .map(|number| format!("Fixes #{number}\n"))
        .unwrap_or_default();
    format!(
        "### [\u{1f50e} Inspect this declaration update suggestion]({})\n\n\
         Bots should take care of checking the formatting and the validity of the declaration. As a human reviewer, you should check:\n\n\
         {}\n\n\
         - - -\n\n\
         {THANKS}\n\n\
         {fixes}\
         - - -\n\n\
         {}",
        ctx.inspect_url,
        update_checklist(ctx, failure).join("\n"),
        footer(ctx, "update suggestion")
    )
}

/// Description replacing an earlier one when a suggestion was re-submitted
/// on a branch that already existed.
pub fn resubmitted_body(ctx: &BodyContext<'_>, updating: bool, failure: Option<&FailureSignal>) -> String {
    let (intro, checklist) = if updating {
        (
            "A new suggestion has been made to update this declaration, voiding the previous ones.",
            update_checklist(ctx, failure),
        )
    } else {
        ("A new suggestion has been made, voiding the previous ones.", add_checklist(ctx))
    };
    format!(
        "### [\u{1f50e} Inspect the updated declaration suggestion]({})\n\n\
         {intro} As a human reviewer, here are the things you should check:\n\n\
         {}\n\n\
         - - -\n\n\
         {}",
        ctx.inspect_url,
        checklist.join("\n"),
        footer(ctx, "suggestion")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn context(has_selector: bool) -> BodyContext<'static> {
        BodyContext {
            name: "Acme",
            id: "Acme",
            document_type: "Terms of Service",
            inspect_url: "https://contribute.example/service?json=x",
            local_url: "http://localhost:3000/service?json=x",
            tool_label: "Contribution tool",
            tool_url: "https://contribute.example",
            has_selector,
            versions_url: "https://github.com/Org/app-versions/commits/main/Acme/Terms%20of%20Service.md",
            snapshots_url: "https://github.com/Org/app-snapshots/commits/main/Acme/Terms%20of%20Service.html",
        }
    }

    fn failure(issue_number: Option<u64>) -> FailureSignal {
        FailureSignal {
            date: chrono::Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            issue_number,
        }
    }

    #[test]
    fn add_body_includes_selector_block_only_with_a_selector() {
        let with = add_body(&context(true));
        assert!(with.contains("**Selectors are:**"));
        assert!(with.contains("**Generated version** is:"));
        assert!(with.contains("The service ID `Acme`"));
        assert!(with.starts_with("### [\u{1f50e} Inspect this declaration suggestion](https://contribute.example/service?json=x)"));
        assert!(with.contains("[on your local instance](http://localhost:3000/service?json=x)"));

        let without = add_body(&context(false));
        assert!(!without.contains("**Selectors are:**"));
        assert!(without.contains("**Generated version** is:"));
        assert!(!without.contains("validUntil"));
    }

    #[test]
    fn update_body_walks_through_valid_until_when_no_failure_is_known() {
        let body = update_body(&context(true), None);
        assert!(body.contains("`validUntil` date is correctly input"));
        assert!(body.contains("(https://github.com/Org/app-versions/commits/main/Acme/Terms%20of%20Service.md)"));
        assert!(body.contains("(https://github.com/Org/app-snapshots/commits/main/Acme/Terms%20of%20Service.html)"));
        assert!(!body.contains("Fixes #"));
        assert!(!body.contains("matches the scope of this instance"));
    }

    #[test]
    fn update_body_links_the_failure_issue() {
        let known = failure(Some(42));
        let body = update_body(&context(false), Some(&known));
        assert!(!body.contains("validUntil"));
        assert!(body.contains("Fixes #42\n"));
        assert!(!body.contains("**Selectors are:**"));
    }

    #[test]
    fn resubmitted_body_keeps_the_flavour_of_the_action() {
        let added = resubmitted_body(&context(true), false, None);
        assert!(added.contains("A new suggestion has been made, voiding the previous ones."));
        assert!(added.contains("The service ID `Acme`"));
        assert!(!added.contains("validUntil"));

        let updated = resubmitted_body(&context(false), true, None);
        assert!(updated.contains("to update this declaration"));
        assert!(updated.contains("`validUntil` date is correctly input"));

        let updated_known = resubmitted_body(&context(false), true, Some(&failure(None)));
        assert!(!updated_known.contains("validUntil"));
    }
}
