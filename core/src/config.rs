/*
 * config.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Ferrocurl, an HTTP(S) transfer library.
 *
 * Ferrocurl is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Ferrocurl is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Ferrocurl.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Library configuration: engine defaults, pool limits and scheduler limits.
//!
//! Values can be loaded from (and saved to) an XML file, by default `~/.ferrocurl/config.xml`:
//!
//! ```xml
//! <ferrocurl>
//!   <engine connect-timeout-ms="15000" max-redirects="30" max-retries="1" user-agent="ferrocurl/0.1.0"/>
//!   <pool idle-ttl-ms="118000" max-idle-per-key="5"/>
//!   <multi max-connecting="8"/>
//! </ferrocurl>
//! ```
//!
//! All XML read/write uses the quick_xml reader/writer. Unknown elements and attributes are
//! ignored; a missing file yields the defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;

use crate::error::{Error, Result};
use crate::pool::PoolConfig;

/// Defaults applied by the request engine when the corresponding option is not set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineDefaults {
    pub connect_timeout: Duration,
    /// -1 for unlimited.
    pub max_redirects: i64,
    pub max_retries: u32,
    pub user_agent: String,
}

impl Default for EngineDefaults {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            max_redirects: 30,
            max_retries: 1,
            user_agent: concat!("ferrocurl/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiConfig {
    /// Transfers allowed in the Connecting state at once.
    pub max_connecting: usize,
    pub pool: PoolConfig,
}

impl Default for MultiConfig {
    fn default() -> Self {
        Self {
            max_connecting: 8,
            pool: PoolConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub engine: EngineDefaults,
    pub multi: MultiConfig,
}

/// Default config directory: ~/.ferrocurl.
pub fn default_config_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from).map(|h| h.join(".ferrocurl"))
}

/// Default config path: ~/.ferrocurl/config.xml.
pub fn default_config_path() -> Option<PathBuf> {
    default_config_dir().map(|d| d.join("config.xml"))
}

fn parse_num<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| Error::Config(format!("attribute {} has invalid value {:?}", name, value)))
}

impl Config {
    /// Load from `path`. A missing file gives the defaults.
    pub fn load(path: &Path) -> Result<Config> {
        let content = match fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Config::default()),
            Err(e) => return Err(Error::Config(format!("{}: {}", path.display(), e))),
        };
        Config::from_xml(&content)
    }

    /// Load from the default path, or defaults when there is no home directory.
    pub fn load_default() -> Result<Config> {
        match default_config_path() {
            Some(p) => Config::load(&p),
            None => Ok(Config::default()),
        }
    }

    pub fn from_xml(content: &str) -> Result<Config> {
        let mut reader = Reader::from_str(content);
        reader.config_mut().trim_text(true);
        let mut buf = Vec::new();
        let mut config = Config::default();
        let mut seen_root = false;

        loop {
            match reader.read_event_into(&mut buf) {
                Err(e) => return Err(Error::Config(format!("XML parse error: {}", e))),
                Ok(Event::Eof) => break,
                Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                    let name = e.name();
                    match name.as_ref() {
                        b"ferrocurl" => seen_root = true,
                        b"engine" => config.apply_engine(&e)?,
                        b"pool" => config.apply_pool(&e)?,
                        b"multi" => config.apply_multi(&e)?,
                        _ => {}
                    }
                }
                _ => {}
            }
            buf.clear();
        }
        if !seen_root {
            return Err(Error::Config("missing <ferrocurl> root element".to_string()));
        }
        Ok(config)
    }

    fn attributes(e: &BytesStart<'_>) -> Result<Vec<(String, String)>> {
        let mut out = Vec::new();
        for attr in e.attributes() {
            let attr = attr.map_err(|e| Error::Config(e.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| Error::Config(e.to_string()))?
                .into_owned();
            out.push((key, value));
        }
        Ok(out)
    }

    fn apply_engine(&mut self, e: &BytesStart<'_>) -> Result<()> {
        for (key, value) in Self::attributes(e)? {
            match key.as_str() {
                "connect-timeout-ms" => {
                    self.engine.connect_timeout = Duration::from_millis(parse_num(&key, &value)?)
                }
                "max-redirects" => {
                    let v: i64 = parse_num(&key, &value)?;
                    if v < -1 {
                        return Err(Error::Config(format!("max-redirects {} is below -1", v)));
                    }
                    self.engine.max_redirects = v;
                }
                "max-retries" => self.engine.max_retries = parse_num(&key, &value)?,
                "user-agent" => self.engine.user_agent = value,
                _ => {}
            }
        }
        Ok(())
    }

    fn apply_pool(&mut self, e: &BytesStart<'_>) -> Result<()> {
        for (key, value) in Self::attributes(e)? {
            match key.as_str() {
                "idle-ttl-ms" => {
                    self.multi.pool.idle_ttl = Duration::from_millis(parse_num(&key, &value)?)
                }
                "max-idle-per-key" => self.multi.pool.max_idle_per_key = parse_num(&key, &value)?,
                _ => {}
            }
        }
        Ok(())
    }

    fn apply_multi(&mut self, e: &BytesStart<'_>) -> Result<()> {
        for (key, value) in Self::attributes(e)? {
            if key == "max-connecting" {
                let v: usize = parse_num(&key, &value)?;
                if v == 0 {
                    return Err(Error::Config("max-connecting must be at least 1".to_string()));
                }
                self.multi.max_connecting = v;
            }
        }
        Ok(())
    }

    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        let err = |e: quick_xml::Error| Error::Config(e.to_string());
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(err)?;
        writer
            .write_event(Event::Start(BytesStart::new("ferrocurl")))
            .map_err(err)?;

        let connect_timeout = self.engine.connect_timeout.as_millis().to_string();
        let max_redirects = self.engine.max_redirects.to_string();
        let max_retries = self.engine.max_retries.to_string();
        let engine = BytesStart::new("engine").with_attributes([
            ("connect-timeout-ms", connect_timeout.as_str()),
            ("max-redirects", max_redirects.as_str()),
            ("max-retries", max_retries.as_str()),
            ("user-agent", self.engine.user_agent.as_str()),
        ]);
        writer.write_event(Event::Empty(engine)).map_err(err)?;

        let idle_ttl = self.multi.pool.idle_ttl.as_millis().to_string();
        let max_idle = self.multi.pool.max_idle_per_key.to_string();
        let pool = BytesStart::new("pool").with_attributes([
            ("idle-ttl-ms", idle_ttl.as_str()),
            ("max-idle-per-key", max_idle.as_str()),
        ]);
        writer.write_event(Event::Empty(pool)).map_err(err)?;

        let max_connecting = self.multi.max_connecting.to_string();
        let multi = BytesStart::new("multi").with_attributes([("max-connecting", max_connecting.as_str())]);
        writer.write_event(Event::Empty(multi)).map_err(err)?;

        writer
            .write_event(Event::End(BytesEnd::new("ferrocurl")))
            .map_err(err)?;
        String::from_utf8(writer.into_inner()).map_err(|e| Error::Config(e.to_string()))
    }

    /// Write to `path`, creating the parent directory if needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::Config(e.to_string()))?;
        }
        fs::write(path, self.to_xml()?).map_err(|e| Error::Config(e.to_string()))
    }
}
