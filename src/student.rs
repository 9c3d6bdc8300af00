//! Interface to the student's bridge code
//!
//! The grader needs two things from a submission: where its contracts live
//! and a way to make it relay messages between the chains. Both go through
//! [`StudentBridge`] so a run can be driven against fakes.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{load_contract_info, ChainRole, ContractInfo, FileConfig, StudentConfig};
use crate::error::GraderError;

/// The student's side of a grading run
#[async_trait]
pub trait StudentBridge: Send + Sync {
    /// Address and ABI of the bridge contract for a role
    async fn contract_info(&self, role: ChainRole) -> Result<ContractInfo, GraderError>;

    /// Scan recent blocks on the given chain and relay what was found
    async fn scan_blocks(&self, role: ChainRole) -> Result<(), GraderError>;
}

fn contract_info_phase(role: ChainRole) -> &'static str {
    match role {
        ChainRole::Source => "contract_info(source)",
        ChainRole::Destination => "contract_info(destination)",
    }
}

fn scan_phase(role: ChainRole) -> &'static str {
    match role {
        ChainRole::Source => "scan_blocks(source)",
        ChainRole::Destination => "scan_blocks(destination)",
    }
}

/// A submission on disk whose scanner runs as a child process
#[derive(Debug, Clone)]
pub struct ProcessBridge {
    student_dir: PathBuf,
    contract_info: PathBuf,
    scan_command: Vec<String>,
    scan_timeout: Duration,
}

impl ProcessBridge {
    pub fn new(student_dir: impl Into<PathBuf>, files: &FileConfig, student: &StudentConfig) -> Self {
        let student_dir = student_dir.into();
        Self {
            contract_info: FileConfig::resolve(&student_dir, &files.contract_info),
            student_dir,
            scan_command: student.scan_command.clone(),
            scan_timeout: student.scan_timeout,
        }
    }

    pub fn student_dir(&self) -> &Path {
        &self.student_dir
    }
}

#[async_trait]
impl StudentBridge for ProcessBridge {
    async fn contract_info(&self, role: ChainRole) -> Result<ContractInfo, GraderError> {
        load_contract_info(&self.contract_info, role)
            .map_err(|e| GraderError::student(contract_info_phase(role), format!("{:#}", e)))
    }

    async fn scan_blocks(&self, role: ChainRole) -> Result<(), GraderError> {
        let phase = scan_phase(role);
        let (program, args) = self
            .scan_command
            .split_first()
            .ok_or_else(|| GraderError::config("scan command is empty"))?;

        info!(
            command = %self.scan_command.join(" "),
            chain = %role,
            dir = %self.student_dir.display(),
            "Running student scanner"
        );

        let child = Command::new(program)
            .args(args)
            .arg(role.as_str())
            .current_dir(&self.student_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.scan_timeout, child)
            .await
            .map_err(|_| {
                GraderError::student(phase, format!("timed out after {:?}", self.scan_timeout))
            })?
            .map_err(|e| GraderError::student(phase, format!("failed to start {}: {}", program, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.trim().is_empty() {
            debug!(chain = %role, output = %stdout.trim_end(), "Scanner stdout");
        }

        if !output.status.success() {
            warn!(chain = %role, status = %output.status, stderr = %stderr.trim_end(), "Student scanner failed");
            return Err(GraderError::student(phase, format!("exited with {}", output.status)));
        }

        Ok(())
    }
}
