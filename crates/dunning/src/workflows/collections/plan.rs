use super::domain::{StepType, TenantPlan};

pub(crate) const PLAN_SKIP_REASON: &str = "not available on plan";

impl TenantPlan {
    /// Step types the tier is entitled to run.
    pub const fn allowed_step_types(self) -> &'static [StepType] {
        match self {
            TenantPlan::Free => &[StepType::Email, StepType::Physical],
            TenantPlan::Starter => &[StepType::Email, StepType::Physical, StepType::Sms],
            TenantPlan::Pro | TenantPlan::Enterprise => &[
                StepType::Email,
                StepType::Physical,
                StepType::Sms,
                StepType::Wait,
            ],
        }
    }
}

pub fn is_step_allowed(plan: TenantPlan, step_type: StepType) -> bool {
    plan.allowed_step_types().contains(&step_type)
}
