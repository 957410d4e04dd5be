use minijinja::{context, Environment};

const TICKET_REPLY_TEMPLATE: &str = include_str!("prompts/ticket_reply.j2");
const SUPPORT_INSTRUCTIONS_TEMPLATE: &str = include_str!("prompts/support_instructions.j2");

pub struct TicketReplyContext<'a> {
    pub reply: &'a str,
    pub ticket_ref: &'a str,
}

/// The provider reply followed by the ticket reference shown to the visitor.
pub fn render_ticket_reply(ctx: &TicketReplyContext<'_>) -> String {
    let mut env = Environment::new();
    if env
        .add_template("ticket_reply", TICKET_REPLY_TEMPLATE)
        .is_err()
    {
        return fallback_ticket_reply(ctx);
    }

    let Ok(template) = env.get_template("ticket_reply") else {
        return fallback_ticket_reply(ctx);
    };

    template
        .render(context! {
            reply => ctx.reply,
            ticket_ref => ctx.ticket_ref,
        })
        .unwrap_or_else(|_| fallback_ticket_reply(ctx))
}

fn fallback_ticket_reply(ctx: &TicketReplyContext<'_>) -> String {
    format!(
        "{}\n\n📋 **Support Ticket Created:** #{}\n\
         Your query has been logged in our system and our support team can track your case.",
        ctx.reply, ctx.ticket_ref
    )
}

pub struct SupportInstructionsContext<'a> {
    pub agent_name: &'a str,
    pub knowledge_base: &'a str,
}

/// Instructions pushed to the provider when an agent is linked to a knowledge base.
pub fn render_support_instructions(ctx: &SupportInstructionsContext<'_>) -> String {
    let mut env = Environment::new();
    if env
        .add_template("support_instructions", SUPPORT_INSTRUCTIONS_TEMPLATE)
        .is_err()
    {
        return fallback_support_instructions(ctx);
    }

    let Ok(template) = env.get_template("support_instructions") else {
        return fallback_support_instructions(ctx);
    };

    template
        .render(context! {
            agent_name => ctx.agent_name.trim(),
            knowledge_base => ctx.knowledge_base.trim(),
        })
        .unwrap_or_else(|_| fallback_support_instructions(ctx))
}

fn fallback_support_instructions(ctx: &SupportInstructionsContext<'_>) -> String {
    let mut prompt = String::from("You are a professional customer support agent");
    if !ctx.agent_name.trim().is_empty() {
        prompt.push_str(" for ");
        prompt.push_str(ctx.agent_name.trim());
    }
    prompt.push_str(
        ". Help users with their queries and collect name, phone number and a description \
         before raising a ticket for a complaint or issue.",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_reply_matches_fallback_format() {
        let ctx = TicketReplyContext {
            reply: "Hello {{ not a tag }}",
            ticket_ref: "1a2b3c4d",
        };
        let rendered = render_ticket_reply(&ctx);
        assert_eq!(rendered, fallback_ticket_reply(&ctx));
        assert!(rendered.starts_with("Hello {{ not a tag }}\n\n"));
        assert!(rendered.contains("#1a2b3c4d"));
    }

    #[test]
    fn support_instructions_mention_agent_and_kb() {
        let rendered = render_support_instructions(&SupportInstructionsContext {
            agent_name: "Acme Help",
            knowledge_base: "kb_acme_1",
        });
        assert!(rendered.starts_with("You are a professional customer support agent for Acme Help."));
        assert!(rendered.contains("\"kb_acme_1\" knowledge base"));
    }

    #[test]
    fn support_instructions_without_names() {
        let rendered = render_support_instructions(&SupportInstructionsContext {
            agent_name: " ",
            knowledge_base: "",
        });
        assert!(rendered.starts_with("You are a professional customer support agent. "));
        assert!(!rendered.contains("knowledge base whenever"));
    }
}
