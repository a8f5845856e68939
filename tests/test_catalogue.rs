use ardflow::geometry::Geometry;
use ardflow::io::search::{self, SearchQuery};
use ardflow::io::{Credentials, Mirror};
use ardflow::io::download;
use ardflow::Settings;

/// Network tests only run when explicitly enabled
fn network_enabled() -> bool {
    std::env::var("ARDFLOW_NETWORK_TESTS").map_or(false, |v| v == "1")
}

fn query() -> SearchQuery {
    SearchQuery {
        aoi: Geometry::from_wkt("POLYGON ((11 47, 11.2 47, 11.2 47.2, 11 47.2, 11 47))").expect("Invalid AOI"),
        start: "2020-01-01".to_string(),
        end: "2020-01-13".to_string(),
        product_type: "GRD".to_string(),
        polarisation: "VV VH".to_string(),
        beam_mode: "IW".to_string(),
    }
}

#[test]
fn test_asf_query_contains_all_parts() {
    let q = search::asf_query(&query());
    assert!(q.starts_with("platform=SENTINEL-1"));
    assert!(q.contains("GRD_HD"));
    assert!(q.contains("VV%2BVH"));
    assert!(q.contains("intersectsWith="));
    assert!(q.contains("start=2020-01-01T00:00:01Z"));
    assert!(q.ends_with("output=jsonlite"));
    assert!(!q.contains(' '));
}

#[test]
fn test_asf_search_live() {
    if !network_enabled() {
        println!("ARDFLOW_NETWORK_TESTS not set, skipping ASF search test");
        return;
    }
    let settings = Settings::from_env();
    let inventory = search::asf_search(&settings.asf_search_url, &query()).expect("ASF search failed");
    println!("Found {} scenes", inventory.len());
    assert!(!inventory.is_empty());
    for record in inventory.iter() {
        assert!(record.identifier.starts_with("S1"));
        assert!(record.geometry.is_some());
    }
}

#[test]
fn test_asf_connection_live() {
    if !network_enabled() {
        println!("ARDFLOW_NETWORK_TESTS not set, skipping ASF connection test");
        return;
    }
    let settings = Settings::from_env();
    let (Some(username), Some(password)) = (settings.username.clone(), settings.password.clone()) else {
        println!("No credentials in the environment, skipping ASF connection test");
        return;
    };
    let credentials = Credentials { username, password };
    download::check_connection(Mirror::Asf, &credentials, &settings).expect("ASF rejected the credentials");
}
