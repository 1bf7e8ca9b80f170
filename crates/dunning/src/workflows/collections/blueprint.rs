use super::domain::{
    Channel, StepType, Template, TemplateId, TenantId, WorkflowDefinition, WorkflowId,
    WorkflowStep,
};
use super::memory::InMemoryCollectionsStore;

/// Built-in collection sequence: email, a three day wait, a text the next day, then a letter a
/// week later.
#[derive(Debug, Clone)]
pub struct CampaignBlueprint {
    workflow: WorkflowDefinition,
    templates: Vec<Template>,
}

struct StepTemplate {
    key: &'static str,
    name: &'static str,
    channel: Channel,
    subject: Option<&'static str>,
    body: &'static str,
}

impl CampaignBlueprint {
    pub fn standard(tenant_id: &TenantId) -> Self {
        let templates: Vec<Template> = standard_step_templates()
            .into_iter()
            .map(|step| Template {
                id: TemplateId::new(format!("{tenant_id}-{}", step.key)),
                tenant_id: tenant_id.clone(),
                name: step.name.to_string(),
                channel: step.channel,
                subject: step.subject.map(str::to_string),
                body: step.body.to_string(),
            })
            .collect();

        let template_for = |channel: Channel| {
            templates
                .iter()
                .find(|template| template.channel == channel)
                .map(|template| template.id.clone())
        };

        let steps = vec![
            WorkflowStep {
                step_number: 1,
                step_type: StepType::Email,
                delay_days: 0,
                delay_hours: 0,
                template_id: template_for(Channel::Email),
            },
            WorkflowStep {
                step_number: 2,
                step_type: StepType::Wait,
                delay_days: 3,
                delay_hours: 0,
                template_id: None,
            },
            WorkflowStep {
                step_number: 3,
                step_type: StepType::Sms,
                delay_days: 1,
                delay_hours: 0,
                template_id: template_for(Channel::Sms),
            },
            WorkflowStep {
                step_number: 4,
                step_type: StepType::Physical,
                delay_days: 7,
                delay_hours: 0,
                template_id: template_for(Channel::Physical),
            },
        ];

        let workflow = WorkflowDefinition {
            id: WorkflowId::new(format!("{tenant_id}-standard")),
            tenant_id: tenant_id.clone(),
            name: "Standard collection sequence".to_string(),
            steps,
            is_default: true,
            is_active: true,
        };

        Self {
            workflow,
            templates,
        }
    }

    pub fn workflow(&self) -> &WorkflowDefinition {
        &self.workflow
    }

    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    /// Registers the workflow and its templates, returning the workflow id.
    pub fn install(self, store: &InMemoryCollectionsStore) -> WorkflowId {
        let id = self.workflow.id.clone();
        for template in self.templates {
            store.put_template(template);
        }
        store.put_workflow(self.workflow);
        id
    }
}

fn standard_step_templates() -> Vec<StepTemplate> {
    vec![
        StepTemplate {
            key: "first-notice-email",
            name: "First notice email",
            channel: Channel::Email,
            subject: Some("Your account {{account_number}} has a balance due"),
            body: "<html><body><p>Hi {{first_name}},</p>\
                   <p>Our records show a balance of {{balance}} on account {{account_number}} as of {{current_date}}.</p>\
                   <p>Reply to this email or call {{company_phone}} to arrange payment.</p>\
                   <p>{{company_name}}<br>{{company_address}}</p>\
                   <p><small>{{disclaimer}}</small></p></body></html>",
        },
        StepTemplate {
            key: "reminder-sms",
            name: "Reminder text",
            channel: Channel::Sms,
            subject: None,
            body: "{{company_name}}: {{first_name}}, your balance of {{balance}} is past due. \
                   Call {{company_phone}} to resolve it.",
        },
        StepTemplate {
            key: "demand-letter",
            name: "Demand letter",
            channel: Channel::Physical,
            subject: None,
            body: "{{current_date}}\n\n{{name}}\n{{street}}\n{{city}}, {{state}} {{zip}}\n\n\
                   Re: account {{account_number}}\n\n\
                   This letter concerns an unpaid balance of {{balance}}. Please contact \
                   {{company_name}} at {{company_phone}} or {{company_email}} within thirty days.\n\n\
                   {{legal_footer}}\n{{disclaimer}}",
        },
    ]
}
