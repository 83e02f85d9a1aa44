//! Provisioning descriptor directories
//!
//! A reservation gets one directory, `dag-{reservation_id}`, holding the
//! combined public key, a top-level job graph (`dag.sub`) with one
//! `JOB VC{site_id} {path}` line per site, and one `vc{site_id}` node
//! directory per site with the job descriptor (`vc{site_id}.sub`) and the
//! provisioning arguments (`vc{site_id}.vmconf`).
//!
//! The directory is the only local state of the controller and is never
//! deleted here. Writing is idempotent: existing files are reused, so a
//! descriptor already read by a remote provisioning run is never clobbered.

use crate::error::DescriptorError;
use booking_client::{Reservation, Site, SiteDescription, UserData};
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

/// Top-level job graph file
pub const GRAPH_FILE: &str = "dag.sub";
/// Combined user + operator public key file
pub const PUBLIC_KEY_FILE: &str = "public_key";
/// Remote host recorded once the provisioning tool was launched for a node
pub const HOSTNAME_FILE: &str = "hostname";
/// Local copy of the provisioning tool log
pub const TOOL_LOG_FILE: &str = "pragma_boot.log";

const NODE_TEMPLATE: &str = r#"universe                     = vm
executable                   = rocks_vc_{{ id }}
requirements                 = Machine =="{{ host }}"
log                          = vc{{ id }}.log.txt
vm_type                      = rocks
vm_memory                    = {{ memory }}
rocks_job_dir                = {{ jobdir }}
JobLeaseDuration             = 7200
RequestMemory                = {{ memory }}
pragma_boot_version          = {{ version }}
pragma_boot_path             = {{ pragma_boot_path }}
python_path                  = {{ python_path }}
username                     = {{ username }}
var_run                      = {{ var_run }}
rocks_should_transfer_files  = Yes
RunAsOwner                   = True
queue
"#;

const VMCONF_TEMPLATE: &str = r#"--executable      = pragma_boot
--key             = {{ key_path }}
--num_cpus        = {{ cpus }}
--mem             = {{ mem }}
--vcname          = {{ vcname }}
--logfile         = {{ jobdir }}/pragma_boot.log
"#;

static JOB_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*JOB\s+VC(\S+)\s+(\S+)\s*$").expect("valid job line pattern")
});
static SUB_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\w+)\s*=\s*(.*?)\s*$").expect("valid descriptor entry pattern")
});
static MACHINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"Machine\s*==\s*"([^"]+)""#).expect("valid machine pattern")
});
static VMCONF_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^--(\S+)\s*=\s*(\S+)").expect("valid argument pattern")
});

/// A reservation's descriptor directory, `{root}/dag-{reservation_id}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorDir {
    path: PathBuf,
    reservation_id: String,
}

/// One `JOB` line of the top-level graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphJob {
    pub site_id: String,
    /// Path of the node's `vc{site_id}.sub` descriptor
    pub descriptor: PathBuf,
}

impl GraphJob {
    /// Directory holding the node's files
    pub fn node_dir(&self) -> PathBuf {
        self.descriptor
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }
}

impl DescriptorDir {
    /// Descriptor directory for a reservation under `root`
    pub fn new(root: &Path, reservation_id: &str) -> Self {
        Self {
            path: root.join(format!("dag-{}", reservation_id)),
            reservation_id: reservation_id.to_string(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn reservation_id(&self) -> &str {
        &self.reservation_id
    }

    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }

    pub fn graph_file(&self) -> PathBuf {
        self.path.join(GRAPH_FILE)
    }

    pub fn public_key_file(&self) -> PathBuf {
        self.path.join(PUBLIC_KEY_FILE)
    }

    pub fn node_dir(&self, site_id: &str) -> PathBuf {
        self.path.join(format!("vc{}", site_id))
    }

    pub fn node_descriptor_file(&self, site_id: &str) -> PathBuf {
        self.node_dir(site_id).join(format!("vc{}.sub", site_id))
    }

    pub fn node_args_file(&self, site_id: &str) -> PathBuf {
        self.node_dir(site_id).join(format!("vc{}.vmconf", site_id))
    }

    /// Directory the descriptor is copied to below a remote working-directory root
    pub fn remote_path(&self, remote_root: &str) -> String {
        format!("{}/dag-{}", remote_root.trim_end_matches('/'), self.reservation_id)
    }

    /// Parse the `JOB` lines of the top-level graph
    pub fn jobs(&self) -> Result<Vec<GraphJob>, DescriptorError> {
        let text = fs::read_to_string(self.graph_file())?;
        Ok(text
            .lines()
            .filter_map(|line| JOB_LINE.captures(line))
            .map(|caps| GraphJob {
                site_id: caps[1].to_string(),
                descriptor: PathBuf::from(&caps[2]),
            })
            .collect())
    }
}

/// Values substituted into the node templates, validated up front
struct NodeParams<'a> {
    host: &'a str,
    cpus: u64,
    memory: u64,
    version: &'a str,
    tool_path: &'a str,
    python_path: &'a str,
    username: &'a str,
    var_run: &'a str,
    vcname: &'a str,
}

impl<'a> NodeParams<'a> {
    fn resolve(
        reservation: &'a Reservation,
        site: &'a Site,
        desc: &'a SiteDescription,
    ) -> Result<Self, DescriptorError> {
        let missing = |attribute: &'static str| DescriptorError::MissingAttribute {
            site_id: site.site_id.clone(),
            attribute,
        };
        let required = |value: &'a Option<String>, attribute: &'static str| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| missing(attribute))
        };

        Ok(Self {
            host: required(&desc.site_hostname, "site_hostname")?,
            cpus: site.cpu.ok_or_else(|| missing("CPU"))?,
            memory: site.memory.ok_or_else(|| missing("memory"))?,
            version: required(&desc.pragma_boot_version, "pragma_boot_version")?,
            tool_path: required(&desc.pragma_boot_path, "pragma_boot_path")?,
            python_path: desc.python_path.as_deref().map(str::trim).unwrap_or(""),
            username: required(&desc.username, "username")?,
            var_run: required(&desc.temp_dir, "temp_dir")?,
            vcname: Some(reservation.image_type.trim())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| missing("image_type"))?,
        })
    }
}

/// Renders descriptor directories below a fixed root
#[derive(Debug, Clone)]
pub struct DescriptorWriter {
    root: PathBuf,
    operator_key: PathBuf,
}

impl DescriptorWriter {
    /// # Arguments
    /// * `root` - directory holding every `dag-{reservation_id}` directory
    /// * `operator_key` - operator public key appended to the user's key
    pub fn new(root: impl Into<PathBuf>, operator_key: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            operator_key: operator_key.into(),
        }
    }

    /// Descriptor directory of a reservation (may not exist yet)
    pub fn dir_for(&self, reservation_id: &str) -> Result<DescriptorDir, DescriptorError> {
        let root = std::path::absolute(&self.root)?;
        Ok(DescriptorDir::new(&root, reservation_id))
    }

    /// Write (or reuse) the descriptor of one reservation site
    ///
    /// Required attributes are checked before anything touches the disk.
    /// Files that already exist are left alone and `dag.sub` is regenerated
    /// from the node directories present, so repeating a call with the same
    /// inputs leaves the directory byte-identical.
    pub fn write(
        &self,
        reservation: &Reservation,
        user: &UserData,
        site: &Site,
        desc: &SiteDescription,
    ) -> Result<DescriptorDir, DescriptorError> {
        let params = NodeParams::resolve(reservation, site, desc)?;
        let dag = self.dir_for(&reservation.reservation_id)?;

        if !dag.exists() {
            debug!("Creating dag directory {}", dag.path().display());
            fs::create_dir_all(dag.path())?;
        }

        let key_file = dag.public_key_file();
        if !key_file.exists() {
            let operator_key = fs::read_to_string(&self.operator_key).map_err(|source| {
                DescriptorError::OperatorKey {
                    path: self.operator_key.clone(),
                    source,
                }
            })?;
            debug!("Writing file {}", key_file.display());
            fs::write(
                &key_file,
                format!("{}\n{}\n", user.public_key.trim(), operator_key.trim()),
            )?;
        }

        let node_dir = dag.node_dir(&site.site_id);
        if node_dir.exists() {
            debug!("Reusing dag node directory {}", node_dir.display());
        } else {
            self.write_node(&dag, site, &params)?;
        }

        write_graph(&dag)?;
        Ok(dag)
    }

    fn write_node(
        &self,
        dag: &DescriptorDir,
        site: &Site,
        params: &NodeParams<'_>,
    ) -> Result<(), DescriptorError> {
        let site_id = &site.site_id;
        let jobdir = dag.path().display().to_string();

        let mut ctx = tera::Context::new();
        ctx.insert("id", site_id);
        ctx.insert("host", params.host);
        ctx.insert("memory", &params.memory);
        ctx.insert("jobdir", &jobdir);
        ctx.insert("version", params.version);
        ctx.insert("pragma_boot_path", params.tool_path);
        ctx.insert("python_path", params.python_path);
        ctx.insert("username", params.username);
        ctx.insert("var_run", params.var_run);
        let node = tera::Tera::one_off(NODE_TEMPLATE, &ctx, false)?;

        let mut ctx = tera::Context::new();
        ctx.insert("key_path", &dag.public_key_file().display().to_string());
        ctx.insert("cpus", &params.cpus);
        ctx.insert("mem", &params.memory);
        ctx.insert("vcname", params.vcname);
        ctx.insert("jobdir", &jobdir);
        let vmconf = tera::Tera::one_off(VMCONF_TEMPLATE, &ctx, false)?;

        // Render into a scratch directory first so a crash never leaves a
        // half-written node directory that later polls would reuse.
        let node_dir = dag.node_dir(site_id);
        let scratch = dag.path().join(format!(".vc{}.partial", site_id));
        if scratch.exists() {
            fs::remove_dir_all(&scratch)?;
        }
        fs::create_dir(&scratch)?;
        fs::write(scratch.join(format!("vc{}.sub", site_id)), node)?;
        fs::write(scratch.join(format!("vc{}.vmconf", site_id)), vmconf)?;
        fs::rename(&scratch, &node_dir)?;
        debug!("Wrote dag node directory {}", node_dir.display());
        Ok(())
    }
}

/// Regenerate `dag.sub` from the node directories on disk
fn write_graph(dag: &DescriptorDir) -> Result<(), DescriptorError> {
    let mut site_ids = Vec::new();
    for entry in fs::read_dir(dag.path())? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(site_id) = name.strip_prefix("vc") {
            if dag.node_descriptor_file(site_id).is_file() {
                site_ids.push(site_id.to_string());
            }
        }
    }
    // numeric ids sort numerically
    site_ids.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));

    let graph: String = site_ids
        .iter()
        .map(|id| format!("JOB VC{} {}\n", id, dag.node_descriptor_file(id).display()))
        .collect();

    let path = dag.graph_file();
    if fs::read_to_string(&path).ok().as_deref() != Some(graph.as_str()) {
        debug!("Writing file {}", path.display());
        fs::write(&path, graph)?;
    }
    Ok(())
}

/// Parsed `vc{site_id}.sub` job descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDescriptor {
    pub site_id: String,
    /// Node directory the descriptor lives in
    pub dir: PathBuf,
    /// Host the provisioning tool runs on
    pub host: String,
    pub username: String,
    pub tool_path: String,
    pub tool_version: String,
    pub python_path: Option<String>,
    /// Remote working-directory root
    pub var_run: String,
}

impl NodeDescriptor {
    /// Load the descriptor of a node directory
    pub fn load(path: &Path, site_id: &str) -> Result<Self, DescriptorError> {
        let text = fs::read_to_string(path)?;
        let entries: HashMap<&str, &str> = text
            .lines()
            .filter_map(|line| SUB_ENTRY.captures(line))
            .filter_map(|caps| Some((caps.get(1)?.as_str(), caps.get(2)?.as_str())))
            .collect();

        let malformed = |reason: String| DescriptorError::Malformed {
            path: path.to_path_buf(),
            reason,
        };
        let field = |key: &str| {
            entries
                .get(key)
                .map(|v| v.to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| malformed(format!("missing '{}'", key)))
        };

        let host = MACHINE
            .captures(&text)
            .map(|caps| caps[1].to_string())
            .ok_or_else(|| malformed("missing Machine requirement".to_string()))?;

        Ok(Self {
            site_id: site_id.to_string(),
            dir: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            host,
            username: field("username")?,
            tool_path: field("pragma_boot_path")?,
            tool_version: field("pragma_boot_version")?,
            python_path: entries
                .get("python_path")
                .map(|v| v.to_string())
                .filter(|v| !v.is_empty()),
            var_run: field("var_run")?,
        })
    }

    /// Load the descriptor named by a graph job
    pub fn for_job(job: &GraphJob) -> Result<Self, DescriptorError> {
        Self::load(&job.descriptor, &job.site_id)
    }

    /// Command line invoking the provisioning tool with `args`
    pub fn tool_command(&self, args: &str) -> String {
        let tool = format!("{}/bin/pragma", self.tool_path.trim_end_matches('/'));
        match &self.python_path {
            Some(python) => format!("{} {} {}", python, tool, args),
            None => format!("{} {}", tool, args),
        }
    }
}

/// Parsed `vc{site_id}.vmconf` provisioning arguments (`--key = value`)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisioningArgs {
    path: PathBuf,
    values: HashMap<String, String>,
}

impl ProvisioningArgs {
    pub fn load(path: &Path) -> Result<Self, DescriptorError> {
        let text = fs::read_to_string(path)?;
        let values = text
            .lines()
            .filter_map(|line| VMCONF_ENTRY.captures(line.trim()))
            .map(|caps| (caps[1].to_string(), caps[2].to_string()))
            .collect();
        Ok(Self {
            path: path.to_path_buf(),
            values,
        })
    }

    /// A required argument
    pub fn get(&self, key: &str) -> Result<&str, DescriptorError> {
        self.values
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| DescriptorError::Malformed {
                path: self.path.clone(),
                reason: format!("missing argument --{}", key),
            })
    }

    /// A required numeric argument
    pub fn number(&self, key: &str) -> Result<u64, DescriptorError> {
        let raw = self.get(key)?;
        raw.parse().map_err(|_| DescriptorError::Malformed {
            path: self.path.clone(),
            reason: format!("argument --{} is not a number: {}", key, raw),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use booking_client::Status;
    use chrono::TimeZone;
    use chrono::Utc;

    fn reservation() -> Reservation {
        Reservation {
            reservation_id: "17".to_string(),
            owner: "alice".to_string(),
            begin: Utc.with_ymd_and_hms(2016, 5, 1, 10, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2016, 5, 2, 10, 0, 0).unwrap(),
            title: "Demo".to_string(),
            description: "".to_string(),
            image_type: "centos7".to_string(),
            sites: vec![site("3"), site("12")],
        }
    }

    fn site(id: &str) -> Site {
        Site {
            site_id: id.to_string(),
            site_name: format!("site-{}", id),
            cpu: Some(2),
            memory: Some(8),
            status: Status::Created,
            admin_description: None,
        }
    }

    fn description() -> SiteDescription {
        SiteDescription {
            site_hostname: Some("rocks.example.org".to_string()),
            pragma_boot_path: Some("/opt/pragma_boot".to_string()),
            pragma_boot_version: Some("2".to_string()),
            python_path: Some("/opt/python/bin/python".to_string()),
            temp_dir: Some("/var/run/pcc".to_string()),
            username: Some("pcc".to_string()),
        }
    }

    fn user() -> UserData {
        UserData {
            firstname: "alice".to_string(),
            email_address: "alice@example.org".to_string(),
            public_key: "ssh-rsa AAAAuser alice@laptop".to_string(),
        }
    }

    fn writer(tmp: &Path) -> DescriptorWriter {
        let key = tmp.join("id_rsa.pub");
        fs::write(&key, "ssh-rsa AAAAoperator root@scheduler\n").unwrap();
        DescriptorWriter::new(tmp.join("dags"), key)
    }

    fn snapshot(dir: &Path) -> Vec<(PathBuf, String)> {
        let mut files = Vec::new();
        let mut stack = vec![dir.to_path_buf()];
        while let Some(d) = stack.pop() {
            for entry in fs::read_dir(&d).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    stack.push(path);
                } else {
                    files.push((path.clone(), fs::read_to_string(&path).unwrap()));
                }
            }
        }
        files.sort();
        files
    }

    #[test]
    fn test_write_creates_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = writer(tmp.path());
        let res = reservation();

        let dag = writer.write(&res, &user(), &res.sites[0], &description()).unwrap();

        assert!(dag.path().ends_with("dag-17"));
        let key = fs::read_to_string(dag.public_key_file()).unwrap();
        assert_eq!(key, "ssh-rsa AAAAuser alice@laptop\nssh-rsa AAAAoperator root@scheduler\n");

        let jobs = dag.jobs().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].site_id, "3");
        assert_eq!(jobs[0].descriptor, dag.node_descriptor_file("3"));

        let node = NodeDescriptor::for_job(&jobs[0]).unwrap();
        assert_eq!(node.host, "rocks.example.org");
        assert_eq!(node.username, "pcc");
        assert_eq!(node.tool_version, "2");
        assert_eq!(node.var_run, "/var/run/pcc");
        assert_eq!(
            node.tool_command("list cluster rocks-201"),
            "/opt/python/bin/python /opt/pragma_boot/bin/pragma list cluster rocks-201"
        );

        let args = ProvisioningArgs::load(&dag.node_args_file("3")).unwrap();
        assert_eq!(args.number("num_cpus").unwrap(), 2);
        assert_eq!(args.number("mem").unwrap(), 8);
        assert_eq!(args.get("vcname").unwrap(), "centos7");
        assert_eq!(
            args.get("key").unwrap(),
            dag.public_key_file().display().to_string()
        );
    }

    #[test]
    fn test_write_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = writer(tmp.path());
        let res = reservation();

        let dag = writer.write(&res, &user(), &res.sites[0], &description()).unwrap();
        let first = snapshot(dag.path());

        // A different user key must not clobber the existing descriptor
        let mut other = user();
        other.public_key = "ssh-rsa AAAAchanged".to_string();
        writer.write(&res, &other, &res.sites[0], &description()).unwrap();
        let second = snapshot(dag.path());

        assert_eq!(first, second);
    }

    #[test]
    fn test_graph_lists_each_site_once() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = writer(tmp.path());
        let res = reservation();

        writer.write(&res, &user(), &res.sites[1], &description()).unwrap();
        writer.write(&res, &user(), &res.sites[0], &description()).unwrap();
        let dag = writer.write(&res, &user(), &res.sites[1], &description()).unwrap();

        let ids: Vec<String> = dag.jobs().unwrap().into_iter().map(|j| j.site_id).collect();
        assert_eq!(ids, vec!["3".to_string(), "12".to_string()]);
    }

    #[test]
    fn test_missing_attribute_writes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = writer(tmp.path());
        let res = reservation();
        let mut desc = description();
        desc.site_hostname = None;

        let err = writer.write(&res, &user(), &res.sites[0], &desc).unwrap_err();
        assert!(matches!(
            err,
            DescriptorError::MissingAttribute { attribute: "site_hostname", .. }
        ));
        assert!(!tmp.path().join("dags").exists());

        let mut no_cpu = res.sites[0].clone();
        no_cpu.cpu = None;
        let err = writer.write(&res, &user(), &no_cpu, &description()).unwrap_err();
        assert!(matches!(err, DescriptorError::MissingAttribute { attribute: "CPU", .. }));
    }

    #[test]
    fn test_node_descriptor_without_python_path() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = writer(tmp.path());
        let res = reservation();
        let mut desc = description();
        desc.python_path = None;

        let dag = writer.write(&res, &user(), &res.sites[0], &desc).unwrap();
        let node = NodeDescriptor::load(&dag.node_descriptor_file("3"), "3").unwrap();
        assert_eq!(node.python_path, None);
        assert_eq!(node.tool_command("clean x"), "/opt/pragma_boot/bin/pragma clean x");
        assert_eq!(dag.remote_path(&node.var_run), "/var/run/pcc/dag-17");
    }
}
