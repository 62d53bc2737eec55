//! Checks run before a deployment is served.

use fb_case::CaseTemplate;
use fb_deploy::{Deployment, validate_deployment};
use fb_runner::resolve_program;

use crate::error::{ServiceError, ServiceResult};

/// Open and verify every model's template and resolve every step program.
///
/// Returns the opened templates in model order. The workspace root is
/// created by the workspace manager itself.
pub fn check_deployment(deployment: &Deployment) -> ServiceResult<Vec<CaseTemplate>> {
    validate_deployment(deployment).map_err(fb_deploy::DeployError::from)?;

    let mut templates = Vec::with_capacity(deployment.models.len());
    for model in &deployment.models {
        let failed = |reason: String| ServiceError::DeploymentCheck {
            subject: format!("model '{}'", model.name),
            reason,
        };

        let template = CaseTemplate::open(model).map_err(|e| failed(e.to_string()))?;
        template.verify().map_err(|e| failed(e.to_string()))?;

        for step in &model.solver.steps {
            let path = resolve_program(&step.program, template.root())
                .map_err(|e| failed(format!("step '{}': {e}", step.name)))?;
            tracing::debug!(model = %model.name, step = %step.name, program = %path.display(), "step program resolved");
        }

        tracing::info!(model = %model.name, template = %template.root().display(), "model checked");
        templates.push(template);
    }
    Ok(templates)
}
