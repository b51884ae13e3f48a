use serde::de::{self, Deserialize, Deserializer};

pub fn de_with_optional_float<'de, D>(de: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(de).and_then(|s| {
        if s.is_empty() {
            Ok(None)
        } else {
            s.parse().map(Some).map_err(de::Error::custom)
        }
    })
}

#[test]
fn test_optional_float() {
    #[derive(serde::Deserialize)]
    struct Test {
        #[serde(deserialize_with = "de_with_optional_float", default)]
        lat: Option<f64>,
    }
    let parse = |data: &str| -> Result<Test, csv::Error> {
        csv::Reader::from_reader(data.as_bytes())
            .deserialize()
            .next()
            .unwrap()
    };
    assert_eq!(Some(41.015), parse("lat\n41.015\n").unwrap().lat);
    assert_eq!(None, parse("lat,x\n,1\n").unwrap().lat);
    assert!(parse("lat\nnorth\n").is_err());
}
