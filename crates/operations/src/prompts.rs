//! Prompt text for each operation. Only the wire markers inside are
//! contractual; the wording around them can change freely.

use context_protocol::{LabelValue, ANSWER_END, LIST_END};

pub(crate) fn answer_system(instructions: Option<&str>) -> String {
    let extra = instructions.unwrap_or("Keep the answer short and precise.");
    format!(
        "Answer questions using only the numbered documents you are given.\n\
         \n\
         Every document line starts with `■NNN | `. Cite the lines that support each \
         statement right after it: `■012` for one line, `■012-015` for a range. \
         Several citations may follow each other (`■004■019`).\n\
         \n\
         Reply with exactly one of these shapes and end with {ANSWER_END}:\n\
         \n\
         ■answer\n\
         <answer with inline citations>\n\
         {ANSWER_END}\n\
         \n\
         ■ambiguous\n\
         <why the question can be read several ways>\n\
         ■follow_up\n\
         <one clarifying question>\n\
         ■answer\n\
         <answer for the first reading, cited>\n\
         ■answer\n\
         <answer for the second reading, cited>\n\
         {ANSWER_END}\n\
         \n\
         ■out_of_topic\n\
         <why the question has nothing to do with the documents>\n\
         {ANSWER_END}\n\
         \n\
         ■invalid_question\n\
         <why the input is not a usable question>\n\
         {ANSWER_END}\n\
         \n\
         ■missing_knowledge\n\
         <which facts the documents lack>\n\
         {ANSWER_END}\n\
         \n\
         Prefer ■answer whenever the documents support one. Never state anything \
         the documents do not say, and never leave a statement uncited.\n\
         \n\
         Additional instructions: {extra}"
    )
}

pub(crate) fn answer_user(documents: &str, question: &str) -> String {
    format!("<documents>\n{documents}\n</documents>\n\nQuestion: \"{question}\"")
}

pub(crate) fn group_system(instructions: Option<&str>) -> String {
    let extra = instructions.unwrap_or("Put similar elements in the same group.");
    format!(
        "Sort elements into groups.\n\
         \n\
         Instructions: {extra}\n\
         \n\
         Give every element exactly one group label. Reuse an existing label, \
         spelled exactly the same, whenever it fits; otherwise invent a short \
         descriptive one.\n\
         \n\
         Write one line per element, using its index, then {LIST_END}:\n\
         ■0:Label■\n\
         ■1:Label■\n\
         {LIST_END}"
    )
}

pub(crate) fn group_user(labels: &[String], elements: &str, element_count: usize) -> String {
    let mut prompt = String::new();
    if !labels.is_empty() {
        prompt.push_str("Existing groups (reuse these when they fit):\n");
        for label in labels {
            prompt.push_str("- ");
            prompt.push_str(label);
            prompt.push('\n');
        }
        prompt.push('\n');
    }
    prompt.push_str(&format!(
        "Elements ■0 to ■{}:\n{elements}\n\nLabel every element.",
        element_count.saturating_sub(1)
    ));
    prompt
}

fn label_scale() -> String {
    LabelValue::ALL
        .iter()
        .map(|value| value.as_str())
        .collect::<Vec<_>>()
        .join(" | ")
}

/// One format line per label key, each naming its question
pub(crate) fn label_format(labels: &[(String, String)]) -> String {
    let scale = label_scale();
    labels
        .iter()
        .map(|(key, question)| {
            format!("■{key}:【explanation answering \"{question}\"】:x■ (x is one of {scale})")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn label_system(format: &str, instructions: Option<&str>) -> String {
    format!(
        "Tag the input with a verdict for each question below.\n\
         \n\
         ABSOLUTELY_NOT: certain the answer is no.\n\
         PROBABLY_NOT: leaning towards no.\n\
         AMBIGUOUS: cannot tell.\n\
         PROBABLY_YES: leaning towards yes.\n\
         ABSOLUTELY_YES: certain the answer is yes.\n\
         \n\
         Reply with one line per label and end with {LIST_END}:\n\
         {format}\n\
         {LIST_END}\n\
         \n\
         When expert examples are given, treat their verdicts as ground truth \
         and mention the example number in your explanation.\n\
         {}",
        instructions.unwrap_or_default()
    )
}

pub(crate) fn label_user(input: &str, format: &str) -> String {
    format!(
        "Input to tag:\n<|start_input|>\n{input}\n<|end_input|>\n\n\
         Answer in this format:\n{format}\n{LIST_END}"
    )
}

pub(crate) fn patch_system() -> String {
    let marker = context_micropatch::MARKER;
    format!(
        "You edit files by emitting line-addressed patches.\n\
         \n\
         Files arrive as `<FILE path=\"...\" name=\"...\">` blocks whose lines are \
         prefixed `NNN|` with their ORIGINAL 1-based line number.\n\
         \n\
         For every file that needs a change, reply with a block carrying the same \
         path and one operation per line:\n\
         \n\
         <FILE path=\"src/app.ts\">\n\
         {marker}=3|replacement for line 3\n\
         </FILE>\n\
         \n\
         Operations (N, M are original line numbers):\n\
         {marker}<N|text      insert a line before line N\n\
         {marker}>N|text      insert a line after line N\n\
         {marker}=N|text      replace line N; text may continue on following lines\n\
         {marker}=N-M|text    replace lines N to M\n\
         {marker}-N           delete line N\n\
         {marker}-N-M         delete lines N to M\n\
         \n\
         Write \\{marker} for a literal {marker} inside text. Leave out files that need \
         no change. Output only <FILE> blocks."
    )
}

pub(crate) fn patch_user(instructions: &str, files: &str) -> String {
    format!("Instructions: {instructions}\n\n{files}\n\nPatch every file that needs a change.")
}
