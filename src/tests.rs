use crate::aggregate::GraphSummary;
use crate::configuration::ImportConfiguration;
use crate::graph_store::{
    EdgeType, GraphStore, Label, MemoryGraphStore, NodeRef, Properties, SqliteGraphStore,
};
use crate::import::{Importer, Phase, PhaseOutcome, RebuildReport};
use feed_records::ReadStats;

fn rebuild<S: GraphStore + ?Sized>(store: &mut S, data_dir: &str) -> RebuildReport {
    let config = ImportConfiguration::with_data_dir(data_dir);
    Importer::new(store, &config)
        .run_full_rebuild()
        .expect("rebuild failed")
}

fn node<S: GraphStore>(store: &S, label: Label, key: &str) -> Properties {
    store
        .node(&NodeRef::new(label, key))
        .unwrap()
        .unwrap_or_else(|| panic!("no {label} {key}"))
}

fn keys_and_counts(records: &[crate::graph_store::AggregateRecord]) -> Vec<(&str, u64)> {
    records.iter().map(|r| (r.key.as_str(), r.count)).collect()
}

fn phase_report(report: &RebuildReport, phase: Phase) -> &crate::import::PhaseReport {
    report
        .phases
        .iter()
        .filter_map(PhaseOutcome::report)
        .find(|r| r.phase == phase)
        .unwrap_or_else(|| panic!("{phase} was not imported"))
}

#[test]
fn small_feed_end_to_end() {
    let mut store = MemoryGraphStore::new();
    let summary = rebuild(&mut store, "fixtures/basic").summary;

    assert_eq!(3, summary.node_count(Label::Station));
    assert_eq!(1, summary.node_count(Label::Line));
    assert_eq!(4, summary.node_count(Label::PathPoint));
    assert_eq!(3, summary.edge_count(EdgeType::FollowsPoint));
    assert_eq!(3, summary.edge_count(EdgeType::OnRoute));
    assert_eq!(2, summary.edge_count(EdgeType::NextStop));

    let station = node(&store, Label::Station, "101");
    assert_eq!(Some("Merkez"), station["name"].as_text());
    assert_eq!(Some(41.015), station["lat"].as_float());
    assert_eq!(Some("M1"), station["stop_code"].as_text());

    let line = node(&store, Label::Line, "10");
    assert_eq!(Some("1"), line["short_name"].as_text());
    assert_eq!(Some("Merkez - Istasyon"), line["long_name"].as_text());
    assert_eq!(Some("Main street line"), line["description"].as_text());
    assert_eq!(Some("FF0000"), line["color"].as_text());
    assert_eq!(Some("outbound"), line["direction"].as_text());
    assert_eq!(Some("06:00 06:30 07:00"), line["weekday_times"].as_text());
    assert_eq!(Some("09:00"), line["sunday_times"].as_text());

    let point = node(&store, Label::PathPoint, "10_3");
    assert_eq!(Some("10"), point["shape_id"].as_text());
    assert_eq!(Some(3), point["sequence"].as_int());
}

#[test]
fn rebuilding_twice_gives_the_same_graph() {
    let mut store = MemoryGraphStore::new();
    let first = rebuild(&mut store, "fixtures/network");
    let stations_before = node(&store, Label::Station, "2");
    let line_before = node(&store, Label::Line, "11");
    let second = rebuild(&mut store, "fixtures/network");

    assert_eq!(first, second);
    assert_eq!(stations_before, node(&store, Label::Station, "2"));
    assert_eq!(line_before, node(&store, Label::Line, "11"));
}

#[test]
fn importing_a_phase_again_updates_in_place() {
    let config = ImportConfiguration::with_data_dir("fixtures/network");
    let mut store = MemoryGraphStore::new();
    let mut importer = Importer::new(&mut store, &config);
    importer.import_stations().unwrap();
    importer.import_routes().unwrap();
    let once = GraphSummary::collect(importer.store()).unwrap();
    importer.import_stations().unwrap();
    importer.import_routes().unwrap();
    let twice = GraphSummary::collect(importer.store()).unwrap();
    assert_eq!(once, twice);
    assert_eq!(4, twice.node_count(Label::Station));
}

#[test]
fn invalid_rows_and_dangling_references() {
    let mut store = MemoryGraphStore::new();
    let report = rebuild(&mut store, "fixtures/network");

    let stations = phase_report(&report, Phase::Stations);
    assert_eq!(
        ReadStats {
            read: 6,
            accepted: 4,
            skipped: 2
        },
        stations.rows
    );
    let hospital = node(&store, Label::Station, "3");
    assert_eq!(Some(0.0), hospital["lat"].as_float());
    assert_eq!(Some(0.0), hospital["lon"].as_float());
    assert!(store.node(&NodeRef::new(Label::Station, "5")).unwrap().is_none());

    let shapes = phase_report(&report, Phase::Shapes);
    assert_eq!(1, shapes.rows.skipped);

    // line 20 goes through the unknown station 9
    let routes = phase_report(&report, Phase::Routes);
    assert_eq!(21, routes.links.linked);
    assert_eq!(3, routes.links.dangling);
    let next_stops = store.edges(EdgeType::NextStop).unwrap();
    assert!(next_stops
        .iter()
        .all(|e| e.from.key != "9" && e.to.key != "9"));

    let schedules = phase_report(&report, Phase::Schedules);
    assert_eq!(3, schedules.links.linked);
    assert_eq!(1, schedules.links.dangling);
    assert!(store.node(&NodeRef::new(Label::Line, "77")).unwrap().is_none());
}

#[test]
fn stop_lists_are_renumbered() {
    let mut store = MemoryGraphStore::new();
    rebuild(&mut store, "fixtures/network");

    let mut line_11: Vec<(String, i64)> = store
        .edges(EdgeType::OnRoute)
        .unwrap()
        .into_iter()
        .filter(|e| e.to.key == "11")
        .map(|e| (e.from.key, e.tags["ordinal"].as_int().unwrap()))
        .collect();
    line_11.sort_by_key(|(_, ordinal)| *ordinal);
    assert_eq!(
        vec![
            ("4".to_string(), 0),
            ("3".to_string(), 1),
            ("2".to_string(), 2),
            ("1".to_string(), 3)
        ],
        line_11
    );

    let mut hops: Vec<(String, String, i64)> = store
        .edges(EdgeType::NextStop)
        .unwrap()
        .into_iter()
        .filter(|e| e.tags["route_id"].as_text() == Some("11"))
        .map(|e| (e.from.key, e.to.key, e.tags["ordinal"].as_int().unwrap()))
        .collect();
    hops.sort_by_key(|(_, _, ordinal)| *ordinal);
    assert_eq!(
        vec![
            ("4".to_string(), "3".to_string(), 0),
            ("3".to_string(), "2".to_string(), 1),
            ("2".to_string(), "1".to_string(), 2)
        ],
        hops
    );
}

#[test]
fn shape_chains_are_linear() {
    let mut store = MemoryGraphStore::new();
    rebuild(&mut store, "fixtures/network");

    let edges = store.edges(EdgeType::FollowsPoint).unwrap();
    let shape_10: Vec<(&str, &str)> = edges
        .iter()
        .filter(|e| e.tags["shape_id"].as_text() == Some("10"))
        .map(|e| (e.from.key.as_str(), e.to.key.as_str()))
        .collect();
    assert_eq!(vec![("10_0", "10_1"), ("10_1", "10_2"), ("10_2", "10_3")], shape_10);
    assert_eq!(4, edges.len());
}

#[test]
fn schedules_of_the_network() {
    let mut store = MemoryGraphStore::new();
    rebuild(&mut store, "fixtures/network");

    let outbound = node(&store, Label::Line, "10");
    assert_eq!(Some("outbound"), outbound["schedule_direction"].as_text());
    assert_eq!(Some("1"), outbound["short_name"].as_text());

    let inbound = node(&store, Label::Line, "11");
    assert_eq!(Some("inbound"), inbound["direction"].as_text());
    assert_eq!(Some("inbound"), inbound["schedule_direction"].as_text());
    assert_eq!(Some("1A"), inbound["short_name"].as_text());
    assert_eq!(Some("Blue trips end at Market"), inbound["schedule_notes"].as_text());

    // unknown direction value falls back to the id suffix
    let unknown = node(&store, Label::Line, "20");
    assert_eq!(Some("outbound"), unknown["schedule_direction"].as_text());
}

#[test]
fn network_rankings() {
    let mut store = MemoryGraphStore::new();
    let summary = rebuild(&mut store, "fixtures/network").summary;

    assert_eq!(13, summary.edge_count(EdgeType::OnRoute));
    assert_eq!(8, summary.edge_count(EdgeType::NextStop));
    assert_eq!(
        vec![("2", 4), ("1", 3), ("3", 3), ("4", 2)],
        keys_and_counts(&summary.transfer_hubs)
    );
    assert_eq!("Market", summary.transfer_hubs[0].name);
    assert_eq!(
        vec![("2", 4), ("1", 3), ("3", 3), ("4", 2)],
        keys_and_counts(&summary.transfer_hubs_by_line_name)
    );
    assert_eq!(
        vec![("10", 4), ("11", 4), ("30", 3), ("20", 2)],
        keys_and_counts(&summary.longest_lines)
    );
    assert_eq!("inbound", summary.longest_lines[1].detail);
}

#[test]
fn both_backends_build_the_same_graph() {
    let mut memory = MemoryGraphStore::new();
    let in_memory = rebuild(&mut memory, "fixtures/network");

    let dir = tempfile::tempdir().unwrap();
    let mut sqlite = SqliteGraphStore::open(dir.path().join("graph.db")).unwrap();
    let on_disk = rebuild(&mut sqlite, "fixtures/network");

    assert_eq!(in_memory.summary, on_disk.summary);
    assert_eq!(in_memory.phases, on_disk.phases);
    for edge_type in EdgeType::ALL {
        assert_eq!(
            memory.edges(edge_type).unwrap(),
            sqlite.edges(edge_type).unwrap()
        );
    }
    assert_eq!(
        node(&memory, Label::Line, "11"),
        node(&sqlite, Label::Line, "11")
    );
}

#[test]
fn missing_data_directory() {
    let mut store = MemoryGraphStore::new();
    let report = rebuild(&mut store, "fixtures/does-not-exist");
    assert_eq!(4, report.phases.len());
    assert!(report
        .phases
        .iter()
        .all(|outcome| matches!(outcome, PhaseOutcome::Skipped { .. })));
    assert_eq!(0, report.summary.node_count(Label::Station));
}
