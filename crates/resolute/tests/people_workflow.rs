//! End-to-end workflows against an in-memory People app.
//!
//! The app has a login page, a people list with per-row Edit and Delete
//! links, bulk selection, an add/edit form, and several export buttons that
//! download, open a popup, or replace the page.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use async_trait::async_trait;
use resolute::config::{DownloadConfig, EngineConfig, SettleConfig};
use resolute::dialog::DriverPrompts;
use resolute::download::{ArtifactKind, ExportOutcome};
use resolute::grid::{GridRow, RecordPredicate, SortSpec, TableScope};
use resolute::locator::Strategies;
use resolute::logging::{init_logging, LogFormat};
use resolute::mock::{El, MockDom, MockPage};
use resolute::resolver::Constraints;
use resolute::verify::{BulkDelete, CrudActions, CrudCycle, CrudState, Verifier};
use resolute::wait::SettleCondition;
use resolute::{NodeId, PageDriver, ResoluteError, ResoluteResult, ScenarioSession};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// =============================================================================
// APP
// =============================================================================

type Person = [String; 4];

const GENDERS: [(&str, &str, &str); 3] = [
    ("M", "Male", "Male"),
    ("F", "Female", "Female"),
    ("X", "Prefer not to say", "PreferNotToSay"),
];

fn person(fore: &str, family: &str, gender: &str, year: &str) -> Person {
    [fore, family, gender, year].map(ToString::to_string)
}

#[derive(Clone, Default)]
struct People(Arc<Mutex<Vec<Person>>>);

impl People {
    fn with(people: Vec<Person>) -> Self {
        Self(Arc::new(Mutex::new(people)))
    }

    fn all(&self) -> Vec<Person> {
        self.0.lock().unwrap().clone()
    }

    fn family_names(&self) -> Vec<String> {
        self.all().into_iter().map(|p| p[1].clone()).collect()
    }

    fn show_login(dom: &mut MockDom) {
        dom.navigate(
            "https://app/login",
            El::new("form").id("login").children([
                El::input("Username").placeholder("Username"),
                El::input("Password").attr("type", "password"),
                El::new("button").text("Log in").action("login"),
            ]),
        );
    }

    fn show_list(&self, dom: &mut MockDom) {
        let people = self.all();
        let rows = people.iter().enumerate().map(|(i, p)| {
            El::new("tr").children([
                El::new("td").child(
                    El::new("input")
                        .attr("type", "checkbox")
                        .attr("data-index", i.to_string())
                        .action("select"),
                ),
                El::new("td").text(p[0].clone()),
                El::new("td").text(p[1].clone()),
                El::new("td").text(p[2].clone()),
                El::new("td").text(p[3].clone()),
                El::new("td").children([
                    El::new("a")
                        .text("Edit")
                        .attr("data-index", i.to_string())
                        .action("edit"),
                    El::new("a")
                        .text("Delete")
                        .attr("data-index", i.to_string())
                        .action("delete-one"),
                ]),
            ])
        });
        dom.navigate(
            "https://app/people",
            El::new("main").children([
                El::new("h1").text("People"),
                El::new("nav").children([
                    El::new("a").text("Add Person").action("add"),
                    El::new("a").text("Sort by Family Name").action("sort"),
                    El::new("button").text("Export PDF").action("export-pdf"),
                    El::new("button").text("Export CSV").action("export-csv"),
                    El::new("button").text("Export XLSX").action("export-broken"),
                    El::new("button").text("Print").action("print"),
                    El::new("button").text("View PDF").action("view-pdf"),
                ]),
                El::new("table").id("people").children([
                    El::new("thead").child(El::new("tr").children(
                        ["", "Forename", "FamilyName", "Gender", "YearOfBirth", ""]
                            .map(|h| El::new("th").text(h)),
                    )),
                    El::new("tbody").children(rows),
                ]),
                El::new("button")
                    .id("bulk")
                    .text("Delete Selected (0)")
                    .action("delete-selected"),
            ]),
        );
    }

    fn show_form(dom: &mut MockDom, index: Option<usize>, current: &Person) {
        let options = std::iter::once(El::new("option").value("").text("-- choose --")).chain(
            GENDERS.iter().map(|(code, label, shown)| {
                let option = El::new("option").value(*code).text(*label);
                if current[2] == *shown {
                    option.selected()
                } else {
                    option
                }
            }),
        );
        let target = index.map_or_else(|| "new".to_string(), |i| i.to_string());
        dom.navigate(
            "https://app/people/edit",
            El::new("form").id("person").children([
                El::input("Forename").value(current[0].clone()),
                El::input("FamilyName").value(current[1].clone()),
                El::new("select").name("Gender").id("Gender").children(options),
                El::input("YearOfBirth").value(current[3].clone()),
                El::new("button")
                    .text("Save")
                    .attr("data-index", target)
                    .action("save"),
            ]),
        );
    }
}

fn index_of(dom: &MockDom, node: NodeId) -> Option<usize> {
    dom.attr_of(node, "data-index").and_then(|i| i.parse().ok())
}

fn checked_indices(dom: &MockDom) -> Vec<usize> {
    dom.find_all("tbody input[type='checkbox']")
        .into_iter()
        .filter(|c| dom.is_checked(*c))
        .filter_map(|c| index_of(dom, c))
        .collect()
}

fn pdf_bytes(len: usize) -> Vec<u8> {
    let mut bytes = b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n".to_vec();
    bytes.resize(len, b'0');
    bytes
}

fn people_app(people: &People) -> MockPage {
    let page = MockPage::new("https://app/login");
    page.with_dom(People::show_login).unwrap();

    let p = people.clone();
    page.on_action("login", move |dom, _| {
        if dom.field_value("#Username") == "davred" && dom.field_value("#Password") == "Reinhart2244" {
            p.show_list(dom);
        } else {
            let root = dom.root();
            dom.append(root, El::new("div").id("login-error").text("Invalid username or password"))
                .unwrap();
        }
    })
    .unwrap();

    page.on_action("add", |dom, _| {
        People::show_form(dom, None, &person("", "", "", ""));
    })
    .unwrap();

    let p = people.clone();
    page.on_action("edit", move |dom, node| {
        let index = index_of(dom, node).unwrap();
        let current = p.all()[index].clone();
        People::show_form(dom, Some(index), &current);
    })
    .unwrap();

    let p = people.clone();
    page.on_action("save", move |dom, node| {
        let code = dom.field_value("#Gender");
        let shown = GENDERS
            .iter()
            .find(|(c, _, _)| *c == code)
            .map_or("", |(_, _, shown)| *shown);
        let saved = person(
            &dom.field_value("#Forename"),
            &dom.field_value("#FamilyName"),
            shown,
            &dom.field_value("#YearOfBirth"),
        );
        {
            let mut all = p.0.lock().unwrap();
            match index_of(dom, node) {
                Some(index) => all[index] = saved,
                None => all.push(saved),
            }
        }
        p.show_list(dom);
        let root = dom.root();
        dom.append(root, El::new("div").id("flash").text("Saved")).unwrap();
    })
    .unwrap();

    let p = people.clone();
    page.on_action("sort", move |dom, _| {
        p.0.lock()
            .unwrap()
            .sort_by_key(|person| person[1].to_uppercase());
        p.show_list(dom);
    })
    .unwrap();

    page.on_action("select", |dom, _| {
        let count = checked_indices(dom).len();
        let bulk = dom.find("#bulk").unwrap();
        dom.set_text(bulk, format!("Delete Selected ({count})")).unwrap();
    })
    .unwrap();

    let p = people.clone();
    page.on_action("delete-one", move |dom, node| {
        let index = index_of(dom, node).unwrap();
        if dom.confirm("Are you sure you want to delete this person?") {
            p.0.lock().unwrap().remove(index);
            p.show_list(dom);
        }
    })
    .unwrap();

    let p = people.clone();
    page.on_action("delete-selected", move |dom, _| {
        let mut chosen = checked_indices(dom);
        if !dom.confirm(&format!("Delete {} records?", chosen.len())) {
            return;
        }
        chosen.sort_unstable_by(|a, b| b.cmp(a));
        for index in chosen {
            p.0.lock().unwrap().remove(index);
        }
        p.show_list(dom);
        let root = dom.root();
        dom.append(root, El::new("div").id("flash").text("Records deleted"))
            .unwrap();
    })
    .unwrap();

    page.on_action("export-pdf", |dom, _| {
        dom.download("people.pdf", "https://app/people/export.pdf", pdf_bytes(12_000));
    })
    .unwrap();

    let p = people.clone();
    page.on_action("export-csv", move |dom, _| {
        let mut csv = String::from("Forename,FamilyName,Gender,YearOfBirth\n");
        for row in p.all() {
            csv.push_str(&row.join(","));
            csv.push('\n');
        }
        dom.download("people.csv", "https://app/people/export.csv", csv.into_bytes());
    })
    .unwrap();

    page.on_action("export-broken", |dom, _| {
        dom.download(
            "people.xlsx",
            "https://app/people/export.xlsx",
            b"<!DOCTYPE html><html><body>Session expired</body></html>".to_vec(),
        );
    })
    .unwrap();

    page.on_action("print", |dom, _| dom.popup("https://app/people/print"))
        .unwrap();

    page.on_action("view-pdf", |dom, _| {
        dom.show_document(
            "https://app/people/report",
            "<embed type=\"application/pdf\" src=\"blob:report\">",
        );
    })
    .unwrap();

    page
}

// =============================================================================
// FIXTURES
// =============================================================================

fn config(dir: &TempDir) -> EngineConfig {
    init_logging(LogFormat::Text);
    let mut config = EngineConfig::default()
        .with_settle(SettleConfig::default().with_timeout(1_000).with_poll_interval(20))
        .with_downloads(
            DownloadConfig::default()
                .with_artifact_dir(dir.path())
                .with_timeout(2_000),
        );
    config.resolver = config.resolver.with_timeout(400).with_poll_interval(50);
    config
}

fn people_table() -> TableScope {
    TableScope::css("#people")
}

fn list_loaded() -> SettleCondition {
    SettleCondition::marker(Strategies::css("#people"))
}

async fn open_logged_in(name: &str, people: &People, dir: &TempDir) -> (MockPage, ScenarioSession) {
    let page = people_app(people);
    let session = ScenarioSession::open(name, Arc::new(page.clone()), config(dir)).unwrap();
    login(&session, "davred", "Reinhart2244").await.unwrap();
    session.settler().unwrap().settle_default(&list_loaded()).await.unwrap();
    (page, session)
}

async fn login(session: &ScenarioSession, user: &str, password: &str) -> ResoluteResult<()> {
    let resolver = session.resolver()?;
    let forms = session.forms()?;
    let username = resolver
        .resolve(&Strategies::field("Username"), &Constraints::interactable())
        .await?;
    forms.fill(&username, user).await?;
    let secret = resolver
        .resolve(&Strategies::field("Password"), &Constraints::interactable())
        .await?;
    forms.fill(&secret, password).await?;
    let submit = resolver
        .resolve(&Strategies::button("Log in"), &Constraints::interactable())
        .await?;
    forms.click(&submit).await
}

async fn click_button(session: &ScenarioSession, label: &str) -> ResoluteResult<()> {
    let button = session
        .resolver()?
        .resolve(&Strategies::button(label), &Constraints::interactable())
        .await?;
    session.forms()?.click(&button).await
}

/// Drives the add/edit form the way a user would
struct FormCrud {
    original: Person,
    edited: Person,
}

impl FormCrud {
    fn william() -> Self {
        Self {
            original: person("William", "Smith", "Male", "1985"),
            edited: person("William T.", "Smith", "Male", "1990"),
        }
    }

    async fn submit(verifier: &Verifier<'_>, values: &Person) -> ResoluteResult<()> {
        let resolver = verifier.resolver();
        let forms = verifier.forms();
        verifier
            .settler()
            .settle_default(&SettleCondition::marker(Strategies::field("Forename")))
            .await?;
        for (field, value) in [
            ("Forename", &values[0]),
            ("FamilyName", &values[1]),
            ("YearOfBirth", &values[3]),
        ] {
            let input = resolver
                .resolve(&Strategies::field(field), &Constraints::interactable())
                .await?;
            forms.fill(&input, value).await?;
        }
        let gender = resolver
            .resolve(&Strategies::field("Gender"), &Constraints::interactable())
            .await?;
        forms.select_option(&gender, &values[2]).await?;
        let save = resolver
            .resolve(&Strategies::button("Save"), &Constraints::interactable())
            .await?;
        forms.click(&save).await
    }

    async fn open_edit(verifier: &Verifier<'_>, row: &GridRow) -> ResoluteResult<()> {
        let edit = verifier.row_action(row, &Strategies::link("Edit")).await?;
        verifier.forms().click(&edit).await
    }
}

#[async_trait]
impl CrudActions for FormCrud {
    async fn create(&self, verifier: &Verifier<'_>) -> ResoluteResult<()> {
        let add = verifier
            .resolver()
            .resolve(&Strategies::link("Add Person"), &Constraints::interactable())
            .await?;
        verifier.forms().click(&add).await?;
        Self::submit(verifier, &self.original).await
    }

    async fn edit(&self, verifier: &Verifier<'_>, row: &GridRow) -> ResoluteResult<()> {
        Self::open_edit(verifier, row).await?;
        Self::submit(verifier, &self.edited).await
    }

    async fn revert(&self, verifier: &Verifier<'_>, row: &GridRow) -> ResoluteResult<()> {
        Self::open_edit(verifier, row).await?;
        Self::submit(verifier, &self.original).await
    }

    async fn delete(&self, verifier: &Verifier<'_>, row: &GridRow) -> ResoluteResult<()> {
        let delete = verifier.row_action(row, &Strategies::link("Delete")).await?;
        verifier.forms().click(&delete).await
    }
}

fn william_cycle() -> CrudCycle {
    CrudCycle::new(
        people_table(),
        RecordPredicate::new()
            .field("Forename", "William")
            .field("FamilyName", "Smith")
            .field("Gender", "Male")
            .field("YearOfBirth", "1985"),
        RecordPredicate::new()
            .field("Forename", "William T.")
            .field("FamilyName", "Smith")
            .field("YearOfBirth", "1990"),
        list_loaded(),
    )
}

fn seed() -> People {
    People::with(vec![
        person("Ada", "Lovelace", "Female", "1815"),
        person("Alan", "Turing", "Male", "1912"),
    ])
}

// =============================================================================
// LOGIN
// =============================================================================

#[tokio::test]
async fn test_login_reaches_people_list() {
    let dir = TempDir::new().unwrap();
    let people = seed();
    let (page, session) = open_logged_in("login", &people, &dir).await;
    assert_eq!(page.current_url().await.unwrap(), "https://app/people");
    session
        .verifier()
        .unwrap()
        .assert_row_count(&people_table(), 2)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_login_with_wrong_password_shows_error() {
    let dir = TempDir::new().unwrap();
    let page = people_app(&seed());
    let session = ScenarioSession::open("bad login", Arc::new(page.clone()), config(&dir)).unwrap();
    login(&session, "davred", "wrong").await.unwrap();
    session
        .settler()
        .unwrap()
        .settle_default(&SettleCondition::text("(?i)invalid username").unwrap())
        .await
        .unwrap();
    assert_eq!(page.current_url().await.unwrap(), "https://app/login");
}

#[tokio::test]
async fn test_missing_field_reports_candidates() {
    let dir = TempDir::new().unwrap();
    let page = people_app(&seed());
    let session = ScenarioSession::open("diagnostics", Arc::new(page), config(&dir)).unwrap();
    let err = session
        .resolver()
        .unwrap()
        .resolve(&Strategies::field("Surname"), &Constraints::interactable())
        .await
        .unwrap_err();
    let ResoluteError::NotFound {
        attempted,
        candidates,
        ..
    } = &err
    else {
        panic!("expected NotFound, got {err}");
    };
    assert_eq!(attempted.len(), Strategies::field("Surname").len());
    assert!(attempted[0].starts_with("#0 "));
    assert!(candidates.iter().any(|c| c.contains("Username")));
    assert!(candidates.iter().any(|c| c.contains("Password")));
}

// =============================================================================
// CRUD
// =============================================================================

#[tokio::test]
async fn test_add_person_through_form() {
    let dir = TempDir::new().unwrap();
    let people = seed();
    let (_page, session) = open_logged_in("add", &people, &dir).await;
    let verifier = session.verifier().unwrap();
    FormCrud::william().create(&verifier).await.unwrap();
    verifier.settler().settle_default(&list_loaded()).await.unwrap();

    let row = verifier
        .assert_record_unique(
            &people_table(),
            &RecordPredicate::new()
                .field("Forename", "William")
                .field("FamilyName", "Smith")
                .field("Gender", "Male")
                .field("YearOfBirth", "1985"),
        )
        .await
        .unwrap();
    assert_eq!(row.cells[1..5], ["William", "Smith", "Male", "1985"]);
    assert_eq!(people.all().len(), 3);
}

#[tokio::test]
async fn test_crud_cycle_runs_twice() {
    let dir = TempDir::new().unwrap();
    let people = seed();
    let (page, session) = open_logged_in("crud twice", &people, &dir).await;
    let verifier = session.verifier().unwrap();
    let actions = FormCrud::william();

    for _ in 0..2 {
        let prompts = session.accept_prompts().unwrap();
        let report = verifier
            .perform_crud_cycle(&william_cycle(), &actions, &prompts)
            .await
            .unwrap();
        let states: Vec<CrudState> = report.transitions.iter().map(|t| t.to).collect();
        assert_eq!(
            states,
            vec![
                CrudState::Present,
                CrudState::Modified,
                CrudState::Restored,
                CrudState::Deleted
            ]
        );
        assert_eq!(report.dialogs.len(), 1);
        assert_eq!(
            report.dialogs[0].message(),
            "Are you sure you want to delete this person?"
        );
        assert_eq!(people.family_names(), vec!["Lovelace", "Turing"]);
    }

    let calls = page.calls().unwrap();
    assert_eq!(calls.last().map(String::as_str), Some("dialog_behavior Manual"));
}

#[tokio::test]
async fn test_edit_form_keeps_prefer_not_to_say() {
    let dir = TempDir::new().unwrap();
    let people = People::with(vec![person("Sam", "Taylor", "PreferNotToSay", "1979")]);
    let (_page, session) = open_logged_in("prefer not to say", &people, &dir).await;
    let verifier = session.verifier().unwrap();

    let by_label = RecordPredicate::new()
        .field("FamilyName", "Taylor")
        .field("Gender", "Prefer not to say");
    let row = verifier
        .assert_record_exists(&people_table(), &by_label)
        .await
        .unwrap();
    FormCrud::open_edit(&verifier, &row).await.unwrap();
    FormCrud::submit(&verifier, &person("Sam", "Taylor", "Prefer not to say", "1980"))
        .await
        .unwrap();
    verifier.settler().settle_default(&list_loaded()).await.unwrap();

    verifier
        .assert_record_exists(&people_table(), &by_label.clone().field("YearOfBirth", "1980"))
        .await
        .unwrap();
    assert_eq!(people.all()[0][2], "PreferNotToSay");
}

// =============================================================================
// GRID
// =============================================================================

#[tokio::test]
async fn test_sort_by_family_name() {
    let dir = TempDir::new().unwrap();
    let people = People::with(vec![
        person("Zed", "zimmer", "Male", "1990"),
        person("Ann", "Adams", "Female", "1950"),
        person("Bea", "brown", "Female", "1960"),
    ]);
    let (_page, session) = open_logged_in("sort", &people, &dir).await;
    let verifier = session.verifier().unwrap();
    let spec = SortSpec::text("FamilyName");
    assert!(verifier
        .assert_column_sorted(&people_table(), &spec)
        .await
        .is_err());

    let sort = session
        .resolver()
        .unwrap()
        .resolve(&Strategies::link("Sort by Family Name"), &Constraints::interactable())
        .await
        .unwrap();
    session
        .forms()
        .unwrap()
        .click_and_settle(&sort, &list_loaded(), None)
        .await
        .unwrap();
    verifier
        .assert_column_sorted(&people_table(), &spec)
        .await
        .unwrap();
    assert_eq!(people.family_names(), vec!["Adams", "brown", "zimmer"]);
}

#[tokio::test]
async fn test_bulk_delete_four_records() {
    let dir = TempDir::new().unwrap();
    let people = People::with(
        (1..=6)
            .map(|i| person("Bulk", &format!("Record{i}"), "Female", &format!("{}", 2000 + i)))
            .collect(),
    );
    let (page, session) = open_logged_in("bulk delete", &people, &dir).await;
    let verifier = session.verifier().unwrap();

    let targets = [1, 2, 4, 6]
        .iter()
        .map(|i| RecordPredicate::new().field("FamilyName", format!("Record{i}")))
        .collect();
    let plan = BulkDelete::new(
        people_table(),
        targets,
        SettleCondition::marker(Strategies::css("#flash")),
    )
    .with_settle_timeout(Duration::from_millis(800));
    let prompts = DriverPrompts::accepting(&page);
    let report = verifier.bulk_delete(&plan, &prompts).await.unwrap();

    assert_eq!(report.deleted, 4);
    assert_eq!(report.control_text, "Delete Selected (4)");
    assert_eq!((report.rows_before, report.rows_after), (6, 2));
    assert_eq!(report.dialogs.len(), 1);
    assert_eq!(people.family_names(), vec!["Record3", "Record5"]);
}

// =============================================================================
// EXPORTS
// =============================================================================

#[tokio::test]
async fn test_pdf_download_is_validated_and_cleaned_up() {
    let dir = TempDir::new().unwrap();
    let people = seed();
    let (page, mut session) = open_logged_in("export pdf", &people, &dir).await;
    let artifact = session
        .downloads()
        .unwrap()
        .download_as(|| click_button(&session, "Export PDF"), ArtifactKind::Pdf)
        .await
        .unwrap();
    assert_eq!(artifact.suggested_filename, "people.pdf");
    assert_eq!(artifact.detected_kind(), Some(ArtifactKind::Pdf));
    assert!(artifact.path.starts_with(dir.path()));
    assert!(artifact.path.exists());

    session.close().await.unwrap();
    assert!(!artifact.path.exists());
    assert!(page.is_closed().unwrap());
}

#[tokio::test]
async fn test_csv_download_has_rows() {
    let dir = TempDir::new().unwrap();
    let people = seed();
    let (_page, session) = open_logged_in("export csv", &people, &dir).await;
    let artifact = session
        .downloads()
        .unwrap()
        .download_as(|| click_button(&session, "Export CSV"), ArtifactKind::Csv)
        .await
        .unwrap();
    let text = String::from_utf8(artifact.read().await.unwrap()).unwrap();
    assert!(text.contains("Ada,Lovelace,Female,1815"));
}

#[tokio::test]
async fn test_html_saved_as_xlsx_is_wrong_format() {
    let dir = TempDir::new().unwrap();
    let people = seed();
    let (_page, session) = open_logged_in("broken export", &people, &dir).await;
    let err = session
        .downloads()
        .unwrap()
        .download_as(|| click_button(&session, "Export XLSX"), ArtifactKind::Xlsx)
        .await
        .unwrap_err();
    let ResoluteError::WrongFormat {
        expected, filename, ..
    } = &err
    else {
        panic!("expected WrongFormat, got {err}");
    };
    assert_eq!(expected, "XLSX");
    assert_eq!(filename, "people.xlsx");
}

#[tokio::test]
async fn test_export_race_classifies_each_outcome() {
    let dir = TempDir::new().unwrap();
    let people = seed();
    let (_page, session) = open_logged_in("export race", &people, &dir).await;
    let downloads = session.downloads().unwrap();
    let timeout = Duration::from_millis(800);

    let outcome = downloads
        .await_export(|| click_button(&session, "Export PDF"), timeout)
        .await
        .unwrap();
    assert!(matches!(outcome, ExportOutcome::Downloaded(ref a) if a.byte_len == 12_000));

    let outcome = downloads
        .await_export(|| click_button(&session, "Print"), timeout)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ExportOutcome::OpenedInPopup {
            url: "https://app/people/print".to_string()
        }
    );

    let outcome = downloads
        .await_export(|| click_button(&session, "View PDF"), timeout)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ExportOutcome::RenderedInline {
            url: "https://app/people/report".to_string(),
            looks_like_pdf: true,
        }
    );
}
