//! 対話メニュー
//!
//! Prompts for a repository, then loops over numbered operations until `0`.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{spawn_interrupt_handler, Session};
use crate::application::workflow::{OperationCode, OperationRequest};
use crate::domain::entities::conflict::ConflictChoice;
use crate::domain::entities::operation::OperationResult;
use crate::domain::entities::repository_target::RepositoryTarget;
use crate::domain::value_objects::branch_name::BranchName;
use crate::presentation::ui::DisplayHelper;

pub struct InteractiveMenu<'a> {
    display: &'a DisplayHelper,
    session: Session,
    verbose: bool,
    busy: Arc<AtomicBool>,
}

impl<'a> InteractiveMenu<'a> {
    pub fn new(display: &'a DisplayHelper, session: Session, verbose: bool) -> Self {
        Self {
            display,
            session,
            verbose,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn run(mut self, section: Option<String>, number: Option<u32>) -> Result<()> {
        spawn_interrupt_handler(self.session.cancellation().clone(), self.busy.clone());
        let target = self.select_target(section, number)?;

        loop {
            self.print_menu(&target);
            let input = self.display.prompt("operation")?;
            let Some(code) = input.parse::<u32>().ok().and_then(OperationCode::from_code) else {
                self.display.warning(&format!("unknown operation: {}", input));
                continue;
            };

            match code {
                OperationCode::Exit => break,
                OperationCode::ViewLogs => {
                    let records = self.session.log().read_today()?;
                    self.display.section_header("today's operations");
                    self.display.render_records(&records);
                }
                code => {
                    if let Some(request) = self.build_request(code, &target)? {
                        let result = self.execute(&target, request).await;
                        self.offer_resolution(&target, &result).await?;
                    }
                }
            }
        }
        Ok(())
    }

    fn select_target(&self, section: Option<String>, number: Option<u32>) -> Result<RepositoryTarget> {
        let store = &self.session.store;
        if section.is_none() || number.is_none() {
            self.display.render_sections(store.sections());
        }

        let section = match section {
            Some(section) => section,
            None => self.display.prompt("section")?,
        };
        let number = match number {
            Some(number) => number,
            None => self
                .display
                .prompt("number")?
                .parse::<u32>()
                .map_err(|_| anyhow!("entry number must be a positive integer"))?,
        };

        Ok(store.resolve(&section, number)?)
    }

    fn print_menu(&self, target: &RepositoryTarget) {
        self.display.section_header(&target.label());
        self.display
            .print_indented(&self.display.format_path(&target.path().display().to_string()), 1);
        let feature = target
            .feature_branch()
            .map(|b| self.display.format_branch(b.as_str()))
            .unwrap_or_else(|| "-".to_string());
        self.display.print_indented(
            &format!(
                "base {}  feature {}",
                self.display.format_branch(target.base_branch().as_str()),
                feature
            ),
            1,
        );
        println!();
        for code in OperationCode::ALL {
            println!("  {}", code);
        }
    }

    /// Gathers the inputs of one operation; None when the user backs out.
    fn build_request(
        &self,
        code: OperationCode,
        target: &RepositoryTarget,
    ) -> Result<Option<OperationRequest>> {
        if code.is_destructive() && !self.confirm_destructive(code, target)? {
            self.display.info("skipped");
            return Ok(None);
        }

        let request = match code {
            OperationCode::Status => OperationRequest::Status,
            OperationCode::Branches => OperationRequest::ListBranches,
            OperationCode::SwitchToFeature => OperationRequest::Branch { name: None },
            OperationCode::PullBase => OperationRequest::Pull {
                branch: Some(target.base_branch().clone()),
            },
            OperationCode::PullCurrent => OperationRequest::Pull { branch: None },
            OperationCode::CommitAndPush => {
                let message = self.display.prompt("commit message (empty to push only)")?;
                OperationRequest::Push {
                    message: (!message.is_empty()).then_some(message),
                }
            }
            OperationCode::Rebase => OperationRequest::Rebase,
            OperationCode::ResolveConflict => match self.ask_choice()? {
                Some(choice) => OperationRequest::ResolveConflict(choice),
                None => return Ok(None),
            },
            OperationCode::CancelRebase => OperationRequest::CancelRebase,
            OperationCode::ResetToBase => OperationRequest::Reset {
                create_backup: true,
                confirmed: true,
            },
            OperationCode::StashSave => {
                let label = self.display.prompt("stash label (optional)")?;
                OperationRequest::StashSave {
                    label: (!label.is_empty()).then_some(label),
                }
            }
            OperationCode::StashPop => OperationRequest::StashPop,
            OperationCode::StashDrop => OperationRequest::StashDrop,
            OperationCode::DeleteBranch => {
                let name = self.display.prompt("branch to delete")?;
                let name = match BranchName::new(&name) {
                    Ok(name) => name,
                    Err(e) => {
                        self.display.warning(&e.to_string());
                        return Ok(None);
                    }
                };
                let also_remote = self
                    .display
                    .confirm(&format!("also delete origin/{}?", name))?;
                OperationRequest::DeleteBranch {
                    name,
                    also_remote,
                    confirmed: true,
                }
            }
            OperationCode::FullFlow => OperationRequest::FullFlow,
            OperationCode::ViewLogs | OperationCode::Exit => return Ok(None),
        };
        Ok(Some(request))
    }

    fn confirm_destructive(&self, code: OperationCode, target: &RepositoryTarget) -> Result<bool> {
        let question = match code {
            OperationCode::ResetToBase => format!(
                "hard-reset the current branch of {} to {}? uncommitted work is stashed",
                target.label(),
                target.base_branch()
            ),
            OperationCode::StashDrop => "drop the newest stash entry?".to_string(),
            _ => format!("{}?", code.description().to_lowercase()),
        };
        Ok(self.display.confirm(&question)?)
    }

    fn ask_choice(&self) -> Result<Option<ConflictChoice>> {
        let input = self
            .display
            .prompt("continue / abort / skip (empty to leave it)")?;
        if input.is_empty() {
            return Ok(None);
        }
        match input.parse::<ConflictChoice>() {
            Ok(choice) => Ok(Some(choice)),
            Err(e) => {
                self.display.warning(&e);
                Ok(None)
            }
        }
    }

    async fn execute(&mut self, target: &RepositoryTarget, request: OperationRequest) -> OperationResult {
        let spinner = self
            .display
            .create_spinner(&format!("{} on {}", request.kind(), target.label()));

        self.busy.store(true, Ordering::SeqCst);
        let result = self.session.orchestrator.dispatch(target, request).await;
        self.busy.store(false, Ordering::SeqCst);

        spinner.finish_and_clear();
        self.display.render_result(&result, self.verbose);
        result
    }

    /// Keeps offering the conflict choices while the result stays suspended.
    async fn offer_resolution(&mut self, target: &RepositoryTarget, result: &OperationResult) -> Result<()> {
        let mut pending = result.conflict_state().cloned();
        while let Some(conflict) = pending.take() {
            if conflict.choices.is_empty() {
                break;
            }
            let Some(choice) = self.ask_choice()? else {
                break;
            };
            if !conflict.allows(choice) {
                self.display
                    .warning(&format!("{} is not available for this conflict", choice));
                pending = Some(conflict);
                continue;
            }
            let next = self
                .execute(target, OperationRequest::ResolveConflict(choice))
                .await;
            pending = next.conflict_state().cloned();
        }
        Ok(())
    }
}
