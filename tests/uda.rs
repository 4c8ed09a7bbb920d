use issuesync::services::{self, ServiceKind};
use issuesync::uda::{self, UdaRegistry, UdaType};

#[test]
fn every_service_declares_its_unique_key() {
    for kind in ServiceKind::ALL {
        let descriptor = services::descriptor(kind);
        let registry = UdaRegistry::for_services(&[kind]);
        for field in descriptor.unique_key {
            assert!(registry.get(field).is_some(), "{kind}: {field} not declared");
        }
    }
}

#[test]
fn config_lines_cover_every_declaration() {
    let kinds = [ServiceKind::Github, ServiceKind::Gitlab];
    let decls = uda::collect(&kinds);
    let lines = uda::config_lines(&kinds);
    assert_eq!(lines.len(), decls.len() * 2);
    assert!(lines.contains(&"uda.gitlaburl.label=Gitlab URL".to_string()));

    let mut sorted = lines.clone();
    sorted.sort();
    assert_eq!(lines, sorted);
}

#[test]
fn registry_types_follow_declarations() {
    let registry = UdaRegistry::for_services(&[ServiceKind::AzureDevops]);
    assert_eq!(registry.get("adoid").map(|decl| decl.kind), Some(UdaType::Numeric));
    assert_eq!(registry.get("adotitle").map(|decl| decl.kind), Some(UdaType::String));
    assert!(registry.get("githuburl").is_none());
}

#[test]
fn github_config_lines_are_exact() {
    assert_eq!(
        uda::config_lines(&[ServiceKind::Github]),
        vec![
            "uda.githubbody.label=Github Body",
            "uda.githubbody.type=string",
            "uda.githubclosedon.label=GitHub Closed",
            "uda.githubclosedon.type=date",
            "uda.githubcreatedon.label=Github Created",
            "uda.githubcreatedon.type=date",
            "uda.githubmilestone.label=Github Milestone",
            "uda.githubmilestone.type=string",
            "uda.githubnamespace.label=Github Namespace",
            "uda.githubnamespace.type=string",
            "uda.githubnumber.label=Github Issue/PR #",
            "uda.githubnumber.type=numeric",
            "uda.githubrepo.label=Github Repo Slug",
            "uda.githubrepo.type=string",
            "uda.githubstate.label=GitHub State",
            "uda.githubstate.type=string",
            "uda.githubtitle.label=Github Title",
            "uda.githubtitle.type=string",
            "uda.githubtype.label=Github Type",
            "uda.githubtype.type=string",
            "uda.githubupdatedat.label=Github Updated",
            "uda.githubupdatedat.type=date",
            "uda.githuburl.label=Github URL",
            "uda.githuburl.type=string",
            "uda.githubuser.label=Github User",
            "uda.githubuser.type=string",
        ]
    );
}
