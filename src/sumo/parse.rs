// src/sumo/parse.rs

use anyhow::{bail, Context, Result};
use quick_xml::{
    events::{BytesStart, Event},
    Reader,
};
use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};
use tracing::{debug, info};

/// Key injected into every record with the enclosing timestep's time.
pub const TIME_KEY: &str = "t";
const TIMESTEP_TAG: &[u8] = b"timestep";
const TIME_ATTR: &[u8] = b"time";

/// One simulation entity at one timestep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Element name of the entity (`vehicle`, `person`, ...).
    pub kind: String,
    /// Attributes plus [`TIME_KEY`].
    pub fields: BTreeMap<String, String>,
}

impl Record {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

/// Stream `<timestep>` nodes out of `reader`, calling `f` once per direct
/// child element. Only the current event is buffered, so memory does not
/// grow with the document.
pub fn for_each_record<R, F>(reader: R, mut f: F) -> Result<usize>
where
    R: BufRead,
    F: FnMut(Record) -> Result<()>,
{
    let mut xml = Reader::from_reader(reader);
    xml.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut time: Option<String> = None;
    // nesting depth below the open timestep; 0 means "direct child"
    let mut depth = 0usize;
    let mut steps = 0usize;
    let mut emitted = 0usize;

    loop {
        match xml
            .read_event_into(&mut buf)
            .with_context(|| format!("XML error at byte {}", xml.buffer_position()))?
        {
            Event::Start(e) if time.is_none() && e.name().as_ref() == TIMESTEP_TAG => {
                time = Some(step_time(&e)?);
                depth = 0;
                steps += 1;
            }
            Event::Start(e) => {
                if let Some(t) = &time {
                    if depth == 0 {
                        f(to_record(&e, t)?)?;
                        emitted += 1;
                    }
                    depth += 1;
                }
            }
            Event::Empty(e) => {
                if let Some(t) = &time {
                    if depth == 0 {
                        f(to_record(&e, t)?)?;
                        emitted += 1;
                    }
                } else if e.name().as_ref() == TIMESTEP_TAG {
                    // an empty step still needs a valid time
                    step_time(&e)?;
                    steps += 1;
                }
            }
            Event::End(_) if time.is_some() => {
                if depth == 0 {
                    time = None;
                } else {
                    depth -= 1;
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if time.is_some() {
        bail!("document ended inside a <timestep>");
    }
    debug!(steps, records = emitted, "parsed timesteps");
    Ok(emitted)
}

/// Flatten the whole document into a record list.
pub fn parse_timesteps<R: BufRead>(reader: R) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    for_each_record(reader, |r| {
        records.push(r);
        Ok(())
    })?;
    Ok(records)
}

#[tracing::instrument(level = "info", skip_all, fields(path = %path.display()))]
pub fn parse_file(path: &Path) -> Result<Vec<Record>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let records = parse_timesteps(BufReader::new(file))
        .with_context(|| format!("parsing {}", path.display()))?;
    info!(records = records.len(), "parsed XML log");
    Ok(records)
}

fn step_time(e: &BytesStart) -> Result<String> {
    for attr in e.attributes() {
        let attr = attr.context("malformed timestep attribute")?;
        if attr.key.as_ref() == TIME_ATTR {
            return Ok(attr.unescape_value()?.into_owned());
        }
    }
    bail!("<timestep> without a `time` attribute")
}

fn to_record(e: &BytesStart, time: &str) -> Result<Record> {
    let kind = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut fields = BTreeMap::new();
    for attr in e.attributes() {
        let attr = attr.with_context(|| format!("malformed attribute on <{}>", kind))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        fields.insert(key, value);
    }
    fields.insert(TIME_KEY.to_string(), time.to_string());
    // persons carry no vehicle type
    if kind == "person" {
        fields
            .entry("type".to_string())
            .or_insert_with(|| "person".to_string());
    }
    Ok(Record { kind, fields })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const FCD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<fcd-export xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
    <timestep time="0.00">
        <vehicle id="veh0" x="10.5" y="3.2" angle="90.00" type="car" speed="0.00" pos="5.10" lane="e1_0" slope="0.00"/>
        <vehicle id="veh1" x="20.0" y="3.2" angle="90.00" type="bus" speed="1.50" pos="15.00" lane="e1_1" slope="0.00"/>
        <person id="ped0" x="1.0" y="2.0" angle="0.00" speed="1.20" pos="0.50" edge="7" slope="0.00"/>
    </timestep>
    <timestep time="1.00">
        <vehicle id="veh0" x="11.5" y="3.2" angle="90.00" type="car" speed="1.00" pos="6.10" lane="e1_0" slope="0.00"/>
        <vehicle id="veh1" x="21.5" y="3.2" angle="90.00" type="bus" speed="1.50" pos="16.50" lane="e1_1" slope="0.00"/>
        <person id="ped0" x="1.5" y="2.0" angle="0.00" speed="1.20" pos="1.70" edge="7" slope="0.00" type="walker"/>
    </timestep>
</fcd-export>
"#;

    #[test]
    fn two_steps_three_entities_gives_six_records() -> Result<()> {
        let records = parse_timesteps(FCD.as_bytes())?;
        assert_eq!(records.len(), 6);

        let keys: HashSet<(&str, &str)> = records
            .iter()
            .map(|r| (r.get(TIME_KEY).unwrap(), r.get("id").unwrap()))
            .collect();
        assert_eq!(keys.len(), 6);
        assert!(records[..3].iter().all(|r| r.get("t") == Some("0.00")));
        assert!(records[3..].iter().all(|r| r.get("t") == Some("1.00")));
        Ok(())
    }

    #[test]
    fn person_type_defaults_only_when_missing() -> Result<()> {
        let records = parse_timesteps(FCD.as_bytes())?;
        assert_eq!(records[2].kind, "person");
        assert_eq!(records[2].get("type"), Some("person"));
        assert_eq!(records[5].get("type"), Some("walker"));
        assert_eq!(records[0].get("type"), Some("car"));
        Ok(())
    }

    #[test]
    fn nested_children_are_not_records() -> Result<()> {
        let xml = r#"<log><timestep time="2">
            <vehicle id="a"><param key="k" value="v"/></vehicle>
            <vehicle id="b"/>
        </timestep><timestep time="3"/></log>"#;
        let records = parse_timesteps(xml.as_bytes())?;
        let ids: Vec<_> = records.iter().map(|r| r.get("id").unwrap()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        Ok(())
    }

    #[test]
    fn attribute_values_are_unescaped() -> Result<()> {
        let xml = r#"<log><timestep time="0"><vehicle id="a&amp;b" lane="x"/></timestep></log>"#;
        let records = parse_timesteps(xml.as_bytes())?;
        assert_eq!(records[0].get("id"), Some("a&b"));
        Ok(())
    }

    #[test]
    fn malformed_documents_fail() {
        assert!(parse_timesteps(r#"<log><timestep><vehicle id="a"/></timestep></log>"#.as_bytes()).is_err());
        assert!(parse_timesteps(r#"<log><timestep time="0"><vehicle id="a"/>"#.as_bytes()).is_err());
        assert!(parse_timesteps(r#"<log><timestep time="0"><vehicle id="a"></timestep></log>"#.as_bytes()).is_err());
    }

    #[test]
    fn callback_errors_stop_the_stream() {
        let mut seen = 0;
        let res = for_each_record(FCD.as_bytes(), |_| {
            seen += 1;
            if seen == 2 {
                bail!("stop");
            }
            Ok(())
        });
        assert!(res.is_err());
        assert_eq!(seen, 2);
    }
}
